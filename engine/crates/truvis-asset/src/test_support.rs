//! 单元测试共用的内存资源源与 headless 环境

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use ash::vk;
use truvis_gfx::{headless::HeadlessTransferContext, resources::special_buffers::stage_buffer::StagingBuffer};

use crate::{
    asset_loader::AssetLoader,
    asset_source::AssetSource,
    config::{MeshBufferConfig, StagingConfig, StreamingConfig},
    image::{ImageMip, ImagePixels},
    mesh::{MeshGeometry, MeshInfoGeometry, MeshResourceDesc, SubmeshGeometry, Vertex},
    resource_manager::ResourceManager,
};

/// 数据预先放在内存中的 [`AssetSource`]，并统计加载次数
#[derive(Default)]
pub(crate) struct MemoryAssetSource {
    meshes: Mutex<HashMap<PathBuf, MeshGeometry>>,
    images: Mutex<HashMap<PathBuf, ImagePixels>>,
    loads: AtomicUsize,
}

impl MemoryAssetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_mesh(&self, path: impl Into<PathBuf>, geometry: MeshGeometry) {
        self.meshes.lock().unwrap().insert(path.into(), geometry);
    }

    pub fn insert_image(&self, path: impl Into<PathBuf>, pixels: ImagePixels) {
        self.images.lock().unwrap().insert(path.into(), pixels);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn single_triangle() -> MeshGeometry {
        Self::mesh(&[(3, 3)])
    }

    /// 每个 `(vertex_count, index_count)` 生成一个只有一个 mesh info 的 submesh
    ///
    /// 顶点坐标由 submesh 下标和顶点下标决定，不同的 submesh 数据互不相同
    pub fn mesh(parts: &[(u32, u32)]) -> MeshGeometry {
        let submeshes = parts
            .iter()
            .enumerate()
            .map(|(part, &(vertex_count, index_count))| {
                let vertices = (0..vertex_count)
                    .map(|i| Vertex {
                        position: [part as f32, i as f32, (part * 100) as f32 + i as f32],
                        normal: [0.0, 0.0, 1.0],
                        uv: [i as f32 * 0.5, part as f32],
                        tangent: [1.0, 0.0, 0.0, 1.0],
                    })
                    .collect();
                let indices = (0..index_count).map(|i| if vertex_count == 0 { 0 } else { i % vertex_count }).collect();
                SubmeshGeometry {
                    name: format!("part_{}", part),
                    mesh_infos: vec![MeshInfoGeometry::new(format!("part_{}#0", part), vertices, indices)],
                }
            })
            .collect();
        MeshGeometry::new(submeshes)
    }

    /// RGBA8 图片，每个 mip 的字节都不相同
    pub fn gradient_image(width: u32, height: u32, mip_count: u32) -> ImagePixels {
        let mips = (0..mip_count)
            .map(|level| {
                let (w, h) = ((width >> level).max(1), (height >> level).max(1));
                ImageMip {
                    level,
                    width: w,
                    height: h,
                    pixels: (0..w * h * 4).map(|i| (i as u8).wrapping_mul(7).wrapping_add(level as u8 * 31)).collect(),
                }
            })
            .collect();
        ImagePixels {
            format: vk::Format::R8G8B8A8_UNORM,
            texel_size: 4,
            mips,
        }
    }
}

impl AssetSource for MemoryAssetSource {
    fn load_mesh(&self, path: &Path) -> anyhow::Result<MeshGeometry> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let meshes = self.meshes.lock().unwrap();
        match meshes.get(path) {
            Some(geometry) => Ok(geometry.clone()),
            None => anyhow::bail!("no mesh at {:?}", path),
        }
    }

    fn load_image(&self, path: &Path, mip_count: u32) -> anyhow::Result<ImagePixels> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let images = self.images.lock().unwrap();
        let Some(pixels) = images.get(path) else {
            anyhow::bail!("no image at {:?}", path);
        };
        let mut pixels = pixels.clone();
        pixels.mips.truncate(mip_count.max(1) as usize);
        Ok(pixels)
    }
}

pub(crate) fn mesh_desc(path: &str, priority: u32) -> MeshResourceDesc {
    MeshResourceDesc {
        name: path.to_string(),
        mesh_path: PathBuf::from(path),
        priority,
        ..Default::default()
    }
}

/// 使用 inline loader 与 headless context 的 manager，以及指定预算的 staging buffer
pub(crate) fn headless_manager(
    source: Arc<MemoryAssetSource>,
    vertex_capacity: u32,
    index_capacity: u32,
    staging_budget: u64,
) -> (ResourceManager, HeadlessTransferContext, StagingBuffer) {
    truvis_crate_tools::init_log::init_test_log();

    let config = StreamingConfig {
        mesh_buffers: MeshBufferConfig {
            vertex_capacity,
            index_capacity,
        },
        staging: StagingConfig {
            budget_bytes: staging_budget,
        },
        ..Default::default()
    };

    let mut ctx = HeadlessTransferContext::new();
    let manager = ResourceManager::new(&mut ctx, &config, AssetLoader::inline(source)).unwrap();
    let staging = StagingBuffer::new(&mut ctx, "test", config.staging.budget_bytes).unwrap();
    (manager, ctx, staging)
}

/// 模拟一帧：reset staging 后 tick
pub(crate) fn tick(manager: &mut ResourceManager, ctx: &mut HeadlessTransferContext, staging: &mut StagingBuffer) {
    staging.reset();
    manager.tick(1.0 / 60.0, ctx, staging);
}

use std::path::Path;

use anyhow::Context;
use ash::vk;

use crate::{
    image::{ImageMip, ImagePixels, max_mip_levels},
    mesh::{MeshGeometry, MeshInfoGeometry, SubmeshGeometry, Vertex},
};

/// 后台线程从哪里读取资源数据
///
/// 实现需要是线程安全的，会被多个 worker 同时调用
pub trait AssetSource: Send + Sync {
    fn load_mesh(&self, path: &Path) -> anyhow::Result<MeshGeometry>;

    /// 读取 image 并生成最多 `mip_count` 个 mip（受 image 尺寸限制）
    fn load_image(&self, path: &Path, mip_count: u32) -> anyhow::Result<ImagePixels>;
}

/// 从磁盘读取资源
///
/// - mesh: `.glb` / `.gltf` / `.obj`
/// - image: `image` crate 支持的格式，统一转换为 RGBA8
#[derive(Default)]
pub struct FileAssetSource;

impl AssetSource for FileAssetSource {
    fn load_mesh(&self, path: &Path) -> anyhow::Result<MeshGeometry> {
        let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("glb" | "gltf") => load_gltf(path),
            Some("obj") => load_obj(path),
            _ => anyhow::bail!("不支持的 mesh 格式: {:?}", path),
        }
    }

    fn load_image(&self, path: &Path, mip_count: u32) -> anyhow::Result<ImagePixels> {
        let image = image::open(path).with_context(|| format!("加载图片失败: {:?}", path))?;
        Ok(build_mip_chain(image.into_rgba8(), mip_count))
    }
}

/// 逐级减半生成 mip，最小为 1x1
pub fn build_mip_chain(image: image::RgbaImage, mip_count: u32) -> ImagePixels {
    let (width, height) = image.dimensions();
    let mip_count = mip_count.clamp(1, max_mip_levels(width, height));

    let mut mips = Vec::with_capacity(mip_count as usize);
    let mut current = image;
    for level in 0..mip_count {
        if level > 0 {
            let (w, h) = current.dimensions();
            current = image::imageops::resize(
                &current,
                (w / 2).max(1),
                (h / 2).max(1),
                image::imageops::FilterType::Triangle,
            );
        }
        let (w, h) = current.dimensions();
        mips.push(ImageMip {
            level,
            width: w,
            height: h,
            pixels: current.as_raw().clone(),
        });
    }

    ImagePixels {
        format: vk::Format::R8G8B8A8_UNORM,
        texel_size: 4,
        mips,
    }
}

/// 每个 gltf mesh 对应一个 submesh，其中每个三角形 primitive 对应一个 mesh info
fn load_gltf(path: &Path) -> anyhow::Result<MeshGeometry> {
    const DEFAULT_NORMAL: [f32; 3] = [0.0, 0.0, 1.0];
    const DEFAULT_TANGENT: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
    const DEFAULT_UV: [f32; 2] = [0.0; 2];

    let (document, buffers, _images) = gltf::import(path).with_context(|| format!("加载 gltf 失败: {:?}", path))?;

    let mut submeshes = Vec::new();
    for mesh in document.meshes() {
        let mesh_name = mesh.name().map_or_else(|| format!("mesh_{}", mesh.index()), str::to_string);

        let mut mesh_infos = Vec::new();
        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                log::warn!("{:?}: skip non-triangle primitive in {}", path, mesh_name);
                continue;
            }

            let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));
            let Some(positions) = reader.read_positions() else {
                log::warn!("{:?}: primitive without positions in {}", path, mesh_name);
                continue;
            };
            let positions: Vec<[f32; 3]> = positions.collect();
            let vertex_count = positions.len();

            let normals: Vec<[f32; 3]> =
                reader.read_normals().map_or_else(|| vec![DEFAULT_NORMAL; vertex_count], Iterator::collect);
            let tangents: Vec<[f32; 4]> =
                reader.read_tangents().map_or_else(|| vec![DEFAULT_TANGENT; vertex_count], Iterator::collect);
            let uvs: Vec<[f32; 2]> = reader
                .read_tex_coords(0)
                .map_or_else(|| vec![DEFAULT_UV; vertex_count], |uvs| uvs.into_f32().collect());
            let indices: Vec<u32> = match reader.read_indices() {
                Some(indices) => indices.into_u32().collect(),
                None => (0..vertex_count as u32).collect(),
            };

            let vertices = (0..vertex_count)
                .map(|i| Vertex {
                    position: positions[i],
                    normal: normals.get(i).copied().unwrap_or(DEFAULT_NORMAL),
                    uv: uvs.get(i).copied().unwrap_or(DEFAULT_UV),
                    tangent: tangents.get(i).copied().unwrap_or(DEFAULT_TANGENT),
                })
                .collect();

            mesh_infos.push(MeshInfoGeometry::new(
                format!("{}#{}", mesh_name, primitive.index()),
                vertices,
                indices,
            ));
        }

        if !mesh_infos.is_empty() {
            submeshes.push(SubmeshGeometry {
                name: mesh_name,
                mesh_infos,
            });
        }
    }

    Ok(MeshGeometry::new(submeshes))
}

/// 每个 obj model 对应一个只有一个 mesh info 的 submesh
fn load_obj(path: &Path) -> anyhow::Result<MeshGeometry> {
    let (models, _materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            single_index: true,
            triangulate: true,
            ignore_lines: true,
            ignore_points: true,
            ..Default::default()
        },
    )
    .with_context(|| format!("加载 obj 失败: {:?}", path))?;

    let submeshes = models
        .into_iter()
        .map(|model| {
            let mesh = model.mesh;
            let vertex_count = mesh.positions.len() / 3;
            let vertices = (0..vertex_count)
                .map(|i| Vertex {
                    position: [mesh.positions[3 * i], mesh.positions[3 * i + 1], mesh.positions[3 * i + 2]],
                    normal: mesh
                        .normals
                        .get(3 * i..3 * i + 3)
                        .map_or([0.0, 0.0, 1.0], |n| [n[0], n[1], n[2]]),
                    uv: mesh.texcoords.get(2 * i..2 * i + 2).map_or([0.0; 2], |t| [t[0], t[1]]),
                    tangent: [1.0, 0.0, 0.0, 1.0],
                })
                .collect();

            SubmeshGeometry {
                name: model.name.clone(),
                mesh_infos: vec![MeshInfoGeometry::new(model.name, vertices, mesh.indices)],
            }
        })
        .collect();

    Ok(MeshGeometry::new(submeshes))
}

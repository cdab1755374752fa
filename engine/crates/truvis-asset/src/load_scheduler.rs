//! 加载调度：把登记过的加载请求推进到上传队列
//!
//! 每个 tick 遍历待处理集合，根据资源当前的状态决定下一步：
//! - `ScheduledToLoad` / `Unloaded`：提交后台读取任务
//! - `LoadingToMemory`：等待后台结果
//! - `MemoryLoaded`：拆分为上传单元放入上传队列，成功后移出集合
//! - 其余状态：移出集合

use ash::vk;
use indexmap::IndexSet;
use truvis_gfx::{context::GfxTransferContext, resources::resource_data::GfxImageDesc};

use crate::{
    asset_loader::{LoadRequest, LoadResult},
    handle::{AssetImageHandle, AssetMeshHandle, ResourceState},
    image::GpuImage,
    mesh::{GpuMesh, GpuSubmesh},
    priority::UploadPriority,
    resource_manager::ResourceManager,
    upload_queue::UploadJob,
};

/// 等待调度的资源，按登记顺序遍历
#[derive(Default)]
pub(crate) struct LoadSchedules {
    pub meshes: IndexSet<AssetMeshHandle>,
    pub images: IndexSet<AssetImageHandle>,
}

impl ResourceManager {
    /// 取回后台任务的结果，只有这里会把资源推进到 MemoryLoaded / Failed
    pub(crate) fn collect_load_results(&mut self) {
        while let Some(result) = self.asset_loader.try_recv_result() {
            match result {
                LoadResult::Mesh { handle, geometry } => {
                    let Some(mesh) = self.meshes.get_mut(handle) else {
                        log::warn!("Load result for unknown mesh {:?}", handle);
                        continue;
                    };
                    if mesh.state != ResourceState::LoadingToMemory {
                        log::warn!("Mesh {} is {:?}, drop its load result", mesh.desc.name, mesh.state);
                        continue;
                    }
                    match geometry {
                        Ok(geometry) => {
                            log::debug!(
                                "Mesh {} loaded to memory: {} submeshes",
                                mesh.desc.name,
                                geometry.submeshes.len()
                            );
                            mesh.geometry = Some(geometry);
                            mesh.state = ResourceState::MemoryLoaded;
                        }
                        Err(e) => {
                            log::error!("Failed to load mesh {}: {:#}", mesh.desc.name, e);
                            mesh.state = ResourceState::Failed;
                        }
                    }
                }
                LoadResult::Image { handle, pixels } => {
                    let Some(image) = self.images.get_mut(handle) else {
                        log::warn!("Load result for unknown image {:?}", handle);
                        continue;
                    };
                    if image.state != ResourceState::LoadingToMemory {
                        log::warn!("Image {} is {:?}, drop its load result", image.desc.name, image.state);
                        continue;
                    }
                    match pixels {
                        Ok(pixels) if !pixels.mips.is_empty() => {
                            image.pixels = Some(pixels);
                            image.state = ResourceState::MemoryLoaded;
                        }
                        Ok(_) => {
                            log::error!("Failed to load image {}: no pixel data", image.desc.name);
                            image.state = ResourceState::Failed;
                        }
                        Err(e) => {
                            log::error!("Failed to load image {}: {:#}", image.desc.name, e);
                            image.state = ResourceState::Failed;
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn meshes_tick(&mut self) {
        let _span = truvis_crate_tools::profile_span!("ResourceManager::meshes_tick");

        let pending: Vec<_> = self.load_schedules.meshes.iter().copied().collect();
        for handle in pending {
            let keep = match self.mesh_state(handle) {
                ResourceState::MemoryLoaded => !self.mesh_schedule_gpu_upload(handle),
                ResourceState::ScheduledToLoad | ResourceState::Unloaded => {
                    self.mesh_schedule_memory_load(handle);
                    true
                }
                ResourceState::LoadingToMemory => true,
                _ => false,
            };
            if !keep {
                self.load_schedules.meshes.shift_remove(&handle);
            }
        }
    }

    pub(crate) fn images_tick(&mut self, ctx: &mut dyn GfxTransferContext) {
        let _span = truvis_crate_tools::profile_span!("ResourceManager::images_tick");

        let pending: Vec<_> = self.load_schedules.images.iter().copied().collect();
        for handle in pending {
            let keep = match self.image_state(handle) {
                ResourceState::MemoryLoaded => !self.image_schedule_gpu_upload(ctx, handle),
                ResourceState::ScheduledToLoad | ResourceState::Unloaded => {
                    self.image_schedule_memory_load(handle);
                    true
                }
                ResourceState::LoadingToMemory => true,
                _ => false,
            };
            if !keep {
                self.load_schedules.images.shift_remove(&handle);
            }
        }
    }

    /// 状态在提交任务之前切换，保证同一资源不会被提交两次
    fn mesh_schedule_memory_load(&mut self, handle: AssetMeshHandle) {
        let Some(mesh) = self.meshes.get_mut(handle) else {
            return;
        };
        mesh.state = ResourceState::LoadingToMemory;
        self.asset_loader.request_load(LoadRequest::Mesh {
            handle,
            path: mesh.desc.mesh_path.clone(),
        });
    }

    fn image_schedule_memory_load(&mut self, handle: AssetImageHandle) {
        let Some(image) = self.images.get_mut(handle) else {
            return;
        };
        image.state = ResourceState::LoadingToMemory;
        self.asset_loader.request_load(LoadRequest::Image {
            handle,
            path: image.desc.path.clone(),
            mip_count: image.desc.mip_count,
        });
    }

    /// 每个 (submesh, mesh info) 作为一个上传单元进入上传队列
    ///
    /// # Panics
    /// 重复调度
    fn mesh_schedule_gpu_upload(&mut self, handle: AssetMeshHandle) -> bool {
        let Some(mesh) = self.meshes.get_mut(handle) else {
            return false;
        };
        assert!(mesh.gpu.is_none(), "mesh {} is already scheduled for gpu upload", mesh.desc.name);
        let Some(geometry) = mesh.geometry.as_ref() else {
            log::error!("Mesh {} is MemoryLoaded without geometry", mesh.desc.name);
            return false;
        };

        let submeshes: Vec<_> = geometry
            .submeshes
            .iter()
            .enumerate()
            .flat_map(|(submesh_index, submesh)| {
                submesh.mesh_infos.iter().enumerate().map(move |(mesh_info_index, info)| {
                    GpuSubmesh::new(submesh_index as u32, mesh_info_index as u32, info)
                })
            })
            .collect();
        let submesh_count = submeshes.len() as u32;

        let priority = UploadPriority::new(0, mesh.priority);
        for (gpu_submesh_index, submesh) in submeshes.iter().enumerate() {
            self.upload_queue.push(
                priority,
                UploadJob::MeshSubunit {
                    mesh: handle,
                    submesh_index: submesh.submesh_index,
                    mesh_info_index: submesh.mesh_info_index,
                    gpu_submesh_index: gpu_submesh_index as u32,
                },
            );
        }

        mesh.gpu = Some(GpuMesh {
            submeshes,
            submesh_count,
            uploaded_submesh_count: 0,
            aabb: geometry.aabb,
        });
        mesh.state = ResourceState::UploadingToGpu;

        if submesh_count == 0 {
            self.finish_mesh_upload(handle);
        }
        true
    }

    /// 创建完整尺寸的 GPU image，mip 从最粗糙的开始进入上传队列
    ///
    /// # Panics
    /// 重复调度
    fn image_schedule_gpu_upload(&mut self, ctx: &mut dyn GfxTransferContext, handle: AssetImageHandle) -> bool {
        let Some(image) = self.images.get_mut(handle) else {
            return false;
        };
        assert!(image.gpu.is_none(), "image {} is already scheduled for gpu upload", image.desc.name);
        let Some((pixels, mip0)) = image.pixels.as_ref().and_then(|pixels| Some((pixels, pixels.mips.first()?))) else {
            log::error!("Image {} is MemoryLoaded without pixels", image.desc.name);
            return false;
        };

        let extent = vk::Extent3D {
            width: mip0.width,
            height: mip0.height,
            depth: 1,
        };
        let mip_count = pixels.mip_count();
        let gfx_image = match ctx.create_image(&GfxImageDesc {
            name: image.desc.name.clone(),
            extent,
            format: pixels.format,
            mip_levels: mip_count,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        }) {
            Ok(gfx_image) => gfx_image,
            Err(e) => {
                log::error!("Failed to create gpu image for {}: {:#}", image.desc.name, e);
                return false;
            }
        };
        ctx.cmd_transition_image(gfx_image, vk::ImageLayout::TRANSFER_DST_OPTIMAL);

        for mip_level in (0..mip_count).rev() {
            self.upload_queue.push(
                UploadPriority::new(mip_level.min(u8::MAX as u32) as u8, image.priority),
                UploadJob::ImageMip {
                    image: handle,
                    mip_level,
                },
            );
        }

        image.gpu = Some(GpuImage::new(gfx_image, extent, pixels.format, mip_count));
        image.state = ResourceState::UploadingToGpu;
        true
    }
}

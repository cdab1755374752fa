//! 分帧上传：每个 tick 在 staging buffer 的预算内，按优先级从上传队列中取出条目拷贝数据
//!
//! 一个条目在一帧内可能只拷贝了一部分，已上传的字节数保存在条目中，下一帧从断点继续。

use ash::vk;
use truvis_gfx::{
    commands::image_copy::row_chunked_image_copies,
    context::GfxTransferContext,
    resources::{handles::GfxBufferHandle, special_buffers::stage_buffer::StagingBuffer},
};

use crate::{
    handle::{AssetImageHandle, AssetMeshHandle, ResourceState},
    mesh::{GpuSubmesh, INDEX_SIZE, Vertex},
    resource_manager::ResourceManager,
    upload_queue::{UploadEntry, UploadJob},
};

/// 顶点与索引数据在 staging buffer 中的对齐
const MESH_STAGING_ALIGNMENT: vk::DeviceSize = 4;

/// 一次上传尝试的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadOutcome {
    /// 拷贝了数据，或者条目已经完成
    Progressed,
    /// 本帧无法推进：staging 预算用完，或者 buffer 空间不足
    Stalled,
    /// 资源已经不存在或者不在上传状态
    Abandoned,
}

#[inline]
fn percent(done: u64, total: u64) -> u64 {
    if total == 0 { 100 } else { done * 100 / total }
}

/// 申请 staging 空间、写入数据并录制一次 buffer 拷贝，返回拷贝的字节数
fn stage_and_copy(
    ctx: &mut dyn GfxTransferContext,
    staging: &mut StagingBuffer,
    bytes: &[u8],
    dst: GfxBufferHandle,
    dst_offset: vk::DeviceSize,
) -> vk::DeviceSize {
    let grant = staging.request_space(bytes.len() as vk::DeviceSize, MESH_STAGING_ALIGNMENT);
    if grant.size == 0 {
        return 0;
    }
    if !staging.write(ctx, grant.offset, &bytes[..grant.size as usize]) {
        log::error!("Failed to write {} bytes into staging buffer", grant.size);
        return 0;
    }
    ctx.cmd_copy_buffer(
        staging.gfx_buffer(),
        dst,
        &[vk::BufferCopy {
            src_offset: grant.offset,
            dst_offset,
            size: grant.size,
        }],
    );
    grant.size
}

impl ResourceManager {
    pub(crate) fn uploads_tick(&mut self, ctx: &mut dyn GfxTransferContext, staging: &mut StagingBuffer) {
        let _span = truvis_crate_tools::profile_span!("ResourceManager::uploads_tick");
        let occupied_before = staging.occupied();

        while let Some(mut entry) = self.upload_queue.pop() {
            match self.upload_resource(ctx, staging, &mut entry) {
                UploadOutcome::Progressed if entry.priority.progress >= 100 => self.conclude_resource_upload(&entry),
                UploadOutcome::Progressed => self.upload_queue.requeue(entry),
                UploadOutcome::Stalled => {
                    self.upload_queue.requeue(entry);
                    break;
                }
                UploadOutcome::Abandoned => {
                    log::warn!("Drop upload entry {:?}: resource is no longer uploading", entry.job);
                }
            }
        }

        self.upload_queue.age_waiting();
        self.last_tick_staged_bytes = staging.occupied().saturating_sub(occupied_before);
    }

    fn upload_resource(
        &mut self,
        ctx: &mut dyn GfxTransferContext,
        staging: &mut StagingBuffer,
        entry: &mut UploadEntry,
    ) -> UploadOutcome {
        match entry.job {
            UploadJob::MeshSubunit {
                mesh,
                gpu_submesh_index,
                ..
            } => self.mesh_upload(ctx, staging, entry, mesh, gpu_submesh_index),
            UploadJob::ImageMip { image, mip_level } => self.image_upload(ctx, staging, entry, image, mip_level),
        }
    }

    fn uploading_submesh(&self, handle: AssetMeshHandle, gpu_submesh_index: u32) -> Option<&GpuSubmesh> {
        let mesh = self.meshes.get(handle).filter(|mesh| mesh.state == ResourceState::UploadingToGpu)?;
        mesh.gpu.as_ref()?.submeshes.get(gpu_submesh_index as usize)
    }

    fn uploading_submesh_mut(&mut self, handle: AssetMeshHandle, gpu_submesh_index: u32) -> Option<&mut GpuSubmesh> {
        let mesh = self.meshes.get_mut(handle).filter(|mesh| mesh.state == ResourceState::UploadingToGpu)?;
        mesh.gpu.as_mut()?.submeshes.get_mut(gpu_submesh_index as usize)
    }

    /// 先拷贝顶点，再拷贝索引；首次上传时在共享 buffer 中分配空间
    fn mesh_upload(
        &mut self,
        ctx: &mut dyn GfxTransferContext,
        staging: &mut StagingBuffer,
        entry: &mut UploadEntry,
        handle: AssetMeshHandle,
        gpu_submesh_index: u32,
    ) -> UploadOutcome {
        let Some(submesh) = self.uploading_submesh(handle, gpu_submesh_index) else {
            return UploadOutcome::Abandoned;
        };
        let (allocated, vertex_count, index_count) = (submesh.allocated, submesh.vertex_count, submesh.index_count);

        if !allocated {
            let Some((vertex_start, index_start)) =
                self.request_mesh_buffer_space(entry.priority.residency(), vertex_count, index_count)
            else {
                entry.priority.wait = 0;
                return UploadOutcome::Stalled;
            };

            // 驱逐只会卸载 Loaded 的 mesh，正在上传的 submesh 不会受影响
            let Some(submesh) = self.uploading_submesh_mut(handle, gpu_submesh_index) else {
                self.vertex_buffer.free(vertex_start, vertex_count);
                self.index_buffer.free(index_start, index_count);
                return UploadOutcome::Abandoned;
            };
            submesh.allocated = true;
            submesh.vertex_start = vertex_start;
            submesh.index_start = index_start;
            submesh.state = ResourceState::UploadingToGpu;
        }

        let Some(mesh) = self.meshes.get(handle) else {
            return UploadOutcome::Abandoned;
        };
        let Some(submesh) = mesh.gpu.as_ref().and_then(|gpu| gpu.submeshes.get(gpu_submesh_index as usize)) else {
            return UploadOutcome::Abandoned;
        };
        let Some(info) = mesh
            .geometry
            .as_ref()
            .and_then(|geometry| geometry.mesh_info(submesh.submesh_index, submesh.mesh_info_index))
        else {
            return UploadOutcome::Abandoned;
        };

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&info.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&info.indices);
        let vertex_total = vertex_bytes.len() as vk::DeviceSize;
        let index_total = index_bytes.len() as vk::DeviceSize;
        let vertex_dst = submesh.vertex_start as vk::DeviceSize * Vertex::SIZE as vk::DeviceSize;
        let index_dst = submesh.index_start as vk::DeviceSize * INDEX_SIZE as vk::DeviceSize;

        let mut uploaded = entry.uploaded_size;
        let mut copied = 0;
        if uploaded < vertex_total {
            let size = stage_and_copy(
                ctx,
                staging,
                &vertex_bytes[uploaded as usize..],
                self.vertex_buffer.gfx_buffer(),
                vertex_dst + uploaded,
            );
            uploaded += size;
            copied += size;
        }
        if uploaded >= vertex_total && uploaded < vertex_total + index_total {
            let index_uploaded = uploaded - vertex_total;
            let size = stage_and_copy(
                ctx,
                staging,
                &index_bytes[index_uploaded as usize..],
                self.index_buffer.gfx_buffer(),
                index_dst + index_uploaded,
            );
            uploaded += size;
            copied += size;
        }

        if copied == 0 && uploaded < vertex_total + index_total {
            return UploadOutcome::Stalled;
        }

        let vertex_uploaded = uploaded.min(vertex_total);
        let index_uploaded = uploaded - vertex_uploaded;
        entry.uploaded_size = uploaded;
        entry.priority.progress =
            (percent(vertex_uploaded, vertex_total) / 2 + percent(index_uploaded, index_total) / 2) as u8;

        if let Some(submesh) = self.uploading_submesh_mut(handle, gpu_submesh_index) {
            submesh.uploaded_vertex_count = (vertex_uploaded / Vertex::SIZE as vk::DeviceSize) as u32;
            submesh.uploaded_index_count = (index_uploaded / INDEX_SIZE as vk::DeviceSize) as u32;
        }
        UploadOutcome::Progressed
    }

    /// 拷贝一个 mip 中的一段连续 texel，按行拆分为多个 copy region
    fn image_upload(
        &mut self,
        ctx: &mut dyn GfxTransferContext,
        staging: &mut StagingBuffer,
        entry: &mut UploadEntry,
        handle: AssetImageHandle,
        mip_level: u32,
    ) -> UploadOutcome {
        let Some(image) = self.images.get(handle).filter(|image| image.state == ResourceState::UploadingToGpu) else {
            return UploadOutcome::Abandoned;
        };
        let (Some(pixels), Some(gpu)) = (image.pixels.as_ref(), image.gpu.as_ref()) else {
            return UploadOutcome::Abandoned;
        };
        let Some(mip) = pixels.mips.get(mip_level as usize) else {
            return UploadOutcome::Abandoned;
        };

        let texel_size = pixels.texel_size as vk::DeviceSize;
        let total = mip.byte_size();
        let uploaded = entry.uploaded_size;
        if uploaded < total {
            let grant = staging.request_space(total - uploaded, texel_size);
            if grant.size == 0 {
                return UploadOutcome::Stalled;
            }
            let end = uploaded + grant.size;
            if !staging.write(ctx, grant.offset, &mip.pixels[uploaded as usize..end as usize]) {
                log::error!("Failed to write image {} mip {} into staging buffer", image.desc.name, mip_level);
                return UploadOutcome::Stalled;
            }

            let regions = row_chunked_image_copies(
                grant.offset,
                uploaded / texel_size,
                grant.size / texel_size,
                mip.width,
                pixels.texel_size,
                mip_level,
            );
            ctx.cmd_transition_image(gpu.image, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            ctx.cmd_copy_buffer_to_image(staging.gfx_buffer(), gpu.image, &regions);
            ctx.cmd_transition_image(gpu.image, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

            entry.uploaded_size = end;
        }
        entry.priority.progress = percent(entry.uploaded_size, total) as u8;

        if let Some(gpu) = self.images.get_mut(handle).and_then(|image| image.gpu.as_mut())
            && let Some(state) = gpu.mip_states.get_mut(mip_level as usize)
        {
            *state = ResourceState::UploadingToGpu;
        }
        UploadOutcome::Progressed
    }

    /// 上传单元完成：释放对应的 CPU 数据，所有单元完成后资源进入 Loaded
    fn conclude_resource_upload(&mut self, entry: &UploadEntry) {
        match entry.job {
            UploadJob::MeshSubunit {
                mesh: handle,
                submesh_index,
                mesh_info_index,
                gpu_submesh_index,
            } => {
                let Some(mesh) = self.meshes.get_mut(handle) else {
                    return;
                };
                let Some(gpu) = mesh.gpu.as_mut() else {
                    return;
                };
                let Some(submesh) = gpu.submeshes.get_mut(gpu_submesh_index as usize) else {
                    return;
                };
                submesh.state = ResourceState::Loaded;
                submesh.uploaded_vertex_count = submesh.vertex_count;
                submesh.uploaded_index_count = submesh.index_count;
                gpu.uploaded_submesh_count += 1;
                let complete = gpu.is_complete();

                if let Some(info) =
                    mesh.geometry.as_mut().and_then(|geometry| geometry.mesh_info_mut(submesh_index, mesh_info_index))
                {
                    info.release();
                }
                if complete {
                    self.finish_mesh_upload(handle);
                }
            }
            UploadJob::ImageMip {
                image: handle,
                mip_level,
            } => {
                let Some(image) = self.images.get_mut(handle) else {
                    return;
                };
                let Some(gpu) = image.gpu.as_mut() else {
                    return;
                };
                gpu.mark_mip_loaded(mip_level);
                let complete = gpu.is_complete();
                let mip_count = gpu.mip_count;

                if let Some(mip) = image.pixels.as_mut().and_then(|pixels| pixels.mips.get_mut(mip_level as usize)) {
                    mip.pixels = Vec::new();
                }
                if complete {
                    image.state = ResourceState::Loaded;
                    image.pixels = None;
                    log::info!("Image {} loaded: {} mips", image.desc.name, mip_count);
                }
            }
        }
    }

    /// 所有 submesh 都已上传，mesh 进入 Loaded 并参与驱逐
    pub(crate) fn finish_mesh_upload(&mut self, handle: AssetMeshHandle) {
        let Some(mesh) = self.meshes.get_mut(handle) else {
            return;
        };
        mesh.state = ResourceState::Loaded;
        mesh.geometry = None;

        let submesh_count = mesh.gpu.as_ref().map_or(0, |gpu| gpu.submesh_count);
        log::info!("Mesh {} loaded: {} submeshes", mesh.desc.name, submesh_count);
        if submesh_count > 0 {
            self.mark_mesh_resident(handle);
        }
    }
}

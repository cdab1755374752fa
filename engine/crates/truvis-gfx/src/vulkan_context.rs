use std::sync::Arc;

use anyhow::Context;
use ash::vk;
use slotmap::SlotMap;
use vk_mem::Alloc;

use crate::{
    context::GfxTransferContext,
    resources::{
        handles::{GfxBufferHandle, GfxImageHandle},
        resource_data::{BufferType, GfxBufferDesc, GfxImageDesc},
    },
};

struct VulkanBuffer {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
    buffer_type: BufferType,
    /// host 可见的 buffer 在创建时映射，直到销毁
    mapped_ptr: Option<*mut u8>,
    name: String,
}

struct VulkanImage {
    image: vk::Image,
    allocation: vk_mem::Allocation,
    layout: vk::ImageLayout,
    name: String,
}

/// 基于 ash + vk-mem 的 [`GfxTransferContext`]
///
/// 命令录制到外部提供的 command buffer 中，每帧开始时通过 [`Self::set_command_buffer`] 指定。
/// 资源销毁是立即执行的，调用方需要保证 GPU 已经不再使用该资源。
pub struct VulkanTransferContext {
    device: ash::Device,
    allocator: Arc<vk_mem::Allocator>,
    command_buffer: vk::CommandBuffer,

    buffers: SlotMap<GfxBufferHandle, VulkanBuffer>,
    images: SlotMap<GfxImageHandle, VulkanImage>,

    destroyed: bool,
}

// new & init
impl VulkanTransferContext {
    pub fn new(device: ash::Device, allocator: Arc<vk_mem::Allocator>) -> Self {
        Self {
            device,
            allocator,
            command_buffer: vk::CommandBuffer::null(),
            buffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            destroyed: false,
        }
    }

    /// 之后录制的命令都会写入这个 command buffer，需要处于 recording 状态
    #[inline]
    pub fn set_command_buffer(&mut self, command_buffer: vk::CommandBuffer) {
        self.command_buffer = command_buffer;
    }
}

// destroy
impl VulkanTransferContext {
    pub fn destroy(mut self) {
        let _span = truvis_crate_tools::profile_span!("VulkanTransferContext::destroy");
        let buffers: Vec<_> = self.buffers.keys().collect();
        for buffer in buffers {
            self.destroy_buffer(buffer);
        }
        let images: Vec<_> = self.images.keys().collect();
        for image in images {
            self.destroy_image(image);
        }
        self.destroyed = true;
    }
}

impl Drop for VulkanTransferContext {
    fn drop(&mut self) {
        debug_assert!(self.destroyed, "VulkanTransferContext must be destroyed explicitly");
    }
}

// getters
impl VulkanTransferContext {
    pub fn vk_buffer(&self, buffer: GfxBufferHandle) -> Option<vk::Buffer> {
        self.buffers.get(buffer).map(|buffer| buffer.buffer)
    }

    pub fn vk_image(&self, image: GfxImageHandle) -> Option<vk::Image> {
        self.images.get(image).map(|image| image.image)
    }

    pub fn buffer_type(&self, buffer: GfxBufferHandle) -> Option<BufferType> {
        self.buffers.get(buffer).map(|buffer| buffer.buffer_type)
    }
}

// tools
impl VulkanTransferContext {
    /// 某个 layout 下 image 被访问的 stage 与 access
    fn layout_stage_access(layout: vk::ImageLayout) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
        match layout {
            vk::ImageLayout::UNDEFINED => (vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::empty()),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
                (vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            }
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
                vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::SHADER_READ,
            ),
            _ => (
                vk::PipelineStageFlags2::ALL_COMMANDS,
                vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
            ),
        }
    }

    fn assert_recording(&self) {
        debug_assert!(
            self.command_buffer != vk::CommandBuffer::null(),
            "VulkanTransferContext: no command buffer set"
        );
    }
}

impl GfxTransferContext for VulkanTransferContext {
    fn create_buffer(&mut self, desc: &GfxBufferDesc) -> anyhow::Result<GfxBufferHandle> {
        let _span = truvis_crate_tools::profile_span!("VulkanTransferContext::create_buffer");
        let buffer_ci = vk::BufferCreateInfo::default().size(desc.size).usage(desc.usage);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: if desc.host_visible {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM
            } else {
                vk_mem::AllocationCreateFlags::empty()
            },
            ..Default::default()
        };

        let (buffer, mut allocation) = unsafe { self.allocator.create_buffer_with_alignment(&buffer_ci, &alloc_ci, 8) }
            .with_context(|| format!("Failed to create buffer {}", desc.name))?;

        let mut mapped_ptr = None;
        if desc.host_visible {
            match unsafe { self.allocator.map_memory(&mut allocation) } {
                Ok(ptr) => mapped_ptr = Some(ptr),
                Err(e) => {
                    unsafe { self.allocator.destroy_buffer(buffer, &mut allocation) };
                    return Err(e).with_context(|| format!("Failed to map buffer {}", desc.name));
                }
            }
        }

        log::debug!("create buffer {} ({} bytes)", desc.name, desc.size);
        Ok(self.buffers.insert(VulkanBuffer {
            buffer,
            allocation,
            size: desc.size,
            buffer_type: desc.buffer_type,
            mapped_ptr,
            name: desc.name.clone(),
        }))
    }

    fn destroy_buffer(&mut self, buffer: GfxBufferHandle) {
        let Some(mut resource) = self.buffers.remove(buffer) else {
            log::warn!("VulkanTransferContext: destroy unknown buffer {:?}", buffer);
            return;
        };
        unsafe {
            if resource.mapped_ptr.is_some() {
                self.allocator.unmap_memory(&mut resource.allocation);
            }
            self.allocator.destroy_buffer(resource.buffer, &mut resource.allocation);
        }
    }

    fn write_buffer(&mut self, buffer: GfxBufferHandle, offset: vk::DeviceSize, data: &[u8]) -> bool {
        let Some(resource) = self.buffers.get(buffer) else {
            return false;
        };
        let Some(ptr) = resource.mapped_ptr else {
            log::error!("buffer {} is not host visible", resource.name);
            return false;
        };
        let size = data.len() as vk::DeviceSize;
        if offset + size > resource.size {
            return false;
        }

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }
        if let Err(e) = self.allocator.flush_allocation(&resource.allocation, offset, size) {
            log::error!("Failed to flush buffer {}: {}", resource.name, e);
            return false;
        }
        true
    }

    fn create_image(&mut self, desc: &GfxImageDesc) -> anyhow::Result<GfxImageHandle> {
        let _span = truvis_crate_tools::profile_span!("VulkanTransferContext::create_image");
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let (image, allocation) = unsafe { self.allocator.create_image(&create_info, &alloc_info) }
            .with_context(|| format!("Failed to create image {}", desc.name))?;

        Ok(self.images.insert(VulkanImage {
            image,
            allocation,
            layout: vk::ImageLayout::UNDEFINED,
            name: desc.name.clone(),
        }))
    }

    fn destroy_image(&mut self, image: GfxImageHandle) {
        let Some(mut resource) = self.images.remove(image) else {
            log::warn!("VulkanTransferContext: destroy unknown image {:?}", image);
            return;
        };
        unsafe {
            self.allocator.destroy_image(resource.image, &mut resource.allocation);
        }
    }

    fn cmd_copy_buffer(&mut self, src: GfxBufferHandle, dst: GfxBufferHandle, regions: &[vk::BufferCopy]) {
        self.assert_recording();
        let (Some(src), Some(dst)) = (self.vk_buffer(src), self.vk_buffer(dst)) else {
            log::error!("cmd_copy_buffer: invalid buffer handle");
            return;
        };
        unsafe {
            self.device.cmd_copy_buffer(self.command_buffer, src, dst, regions);
        }
    }

    fn cmd_copy_buffer_to_image(&mut self, src: GfxBufferHandle, dst: GfxImageHandle, regions: &[vk::BufferImageCopy]) {
        self.assert_recording();
        let (Some(src), Some(dst)) = (self.vk_buffer(src), self.images.get(dst)) else {
            log::error!("cmd_copy_buffer_to_image: invalid handle");
            return;
        };
        debug_assert_eq!(dst.layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL, "image {} is not TRANSFER_DST", dst.name);
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                self.command_buffer,
                src,
                dst.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            );
        }
    }

    fn cmd_transition_image(&mut self, image: GfxImageHandle, new_layout: vk::ImageLayout) {
        self.assert_recording();
        let Some(resource) = self.images.get_mut(image) else {
            log::error!("cmd_transition_image: invalid image handle");
            return;
        };

        let old_layout = resource.layout;
        let (src_stage, src_access) = Self::layout_stage_access(old_layout);
        let (dst_stage, dst_access) = Self::layout_stage_access(new_layout);
        let barrier = vk::ImageMemoryBarrier2::default()
            .image(resource.image)
            .src_stage_mask(src_stage)
            .src_access_mask(src_access)
            .dst_stage_mask(dst_stage)
            .dst_access_mask(dst_access)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            });
        resource.layout = new_layout;

        let dependency_info = vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
        unsafe {
            self.device.cmd_pipeline_barrier2(self.command_buffer, &dependency_info);
        }
    }

    fn cmd_bind_vertex_buffer(&mut self, buffer: GfxBufferHandle) {
        self.assert_recording();
        let Some(buffer) = self.vk_buffer(buffer) else {
            log::error!("cmd_bind_vertex_buffer: invalid buffer handle");
            return;
        };
        unsafe {
            self.device.cmd_bind_vertex_buffers(self.command_buffer, 0, &[buffer], &[0]);
        }
    }

    fn cmd_bind_index_buffer(&mut self, buffer: GfxBufferHandle, index_type: vk::IndexType) {
        self.assert_recording();
        let Some(buffer) = self.vk_buffer(buffer) else {
            log::error!("cmd_bind_index_buffer: invalid buffer handle");
            return;
        };
        unsafe {
            self.device.cmd_bind_index_buffer(self.command_buffer, buffer, 0, index_type);
        }
    }
}

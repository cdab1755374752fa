//! 不依赖 GPU 的 [`GfxTransferContext`] 实现
//!
//! 所有资源都存放在内存中，copy 命令在录制时立即执行，
//! 同时记录每一条命令，方便在测试和离线工具中检查上传流程。

use ash::vk;
use slotmap::SlotMap;

use crate::{
    context::GfxTransferContext,
    resources::{
        handles::{GfxBufferHandle, GfxImageHandle},
        resource_data::{GfxBufferDesc, GfxImageDesc, format_texel_size, mip_extent},
    },
};

/// 录制下来的命令
#[derive(Debug, Clone)]
pub enum RecordedCommand {
    CopyBuffer {
        src: GfxBufferHandle,
        dst: GfxBufferHandle,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        src: GfxBufferHandle,
        dst: GfxImageHandle,
        regions: Vec<vk::BufferImageCopy>,
    },
    TransitionImage {
        image: GfxImageHandle,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    },
    BindVertexBuffer {
        buffer: GfxBufferHandle,
    },
    BindIndexBuffer {
        buffer: GfxBufferHandle,
        index_type: vk::IndexType,
    },
}

struct HeadlessBuffer {
    desc: GfxBufferDesc,
    data: Vec<u8>,
}

struct HeadlessImage {
    desc: GfxImageDesc,
    texel_size: u32,
    layout: vk::ImageLayout,
    /// 每个 mip 紧密排列的 texel 数据
    mips: Vec<Vec<u8>>,
}

#[derive(Default)]
pub struct HeadlessTransferContext {
    buffers: SlotMap<GfxBufferHandle, HeadlessBuffer>,
    images: SlotMap<GfxImageHandle, HeadlessImage>,
    commands: Vec<RecordedCommand>,
}

// new & init
impl HeadlessTransferContext {
    pub fn new() -> Self {
        Self::default()
    }
}

// getters
impl HeadlessTransferContext {
    pub fn buffer_data(&self, buffer: GfxBufferHandle) -> Option<&[u8]> {
        self.buffers.get(buffer).map(|buffer| buffer.data.as_slice())
    }

    pub fn buffer_desc(&self, buffer: GfxBufferHandle) -> Option<&GfxBufferDesc> {
        self.buffers.get(buffer).map(|buffer| &buffer.desc)
    }

    pub fn image_mip_data(&self, image: GfxImageHandle, mip_level: u32) -> Option<&[u8]> {
        self.images.get(image)?.mips.get(mip_level as usize).map(Vec::as_slice)
    }

    pub fn image_layout(&self, image: GfxImageHandle) -> Option<vk::ImageLayout> {
        self.images.get(image).map(|image| image.layout)
    }

    pub fn image_desc(&self, image: GfxImageHandle) -> Option<&GfxImageDesc> {
        self.images.get(image).map(|image| &image.desc)
    }

    #[inline]
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<RecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    #[inline]
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn live_image_count(&self) -> usize {
        self.images.len()
    }
}

impl GfxTransferContext for HeadlessTransferContext {
    fn create_buffer(&mut self, desc: &GfxBufferDesc) -> anyhow::Result<GfxBufferHandle> {
        let size = usize::try_from(desc.size)?;
        Ok(self.buffers.insert(HeadlessBuffer {
            desc: desc.clone(),
            data: vec![0; size],
        }))
    }

    fn destroy_buffer(&mut self, buffer: GfxBufferHandle) {
        if self.buffers.remove(buffer).is_none() {
            log::warn!("HeadlessTransferContext: destroy unknown buffer {:?}", buffer);
        }
    }

    fn write_buffer(&mut self, buffer: GfxBufferHandle, offset: vk::DeviceSize, data: &[u8]) -> bool {
        let Some(buffer) = self.buffers.get_mut(buffer) else {
            return false;
        };
        if !buffer.desc.host_visible {
            return false;
        }
        let offset = offset as usize;
        let Some(dst) = buffer.data.get_mut(offset..offset + data.len()) else {
            return false;
        };
        dst.copy_from_slice(data);
        true
    }

    fn create_image(&mut self, desc: &GfxImageDesc) -> anyhow::Result<GfxImageHandle> {
        let Some(texel_size) = format_texel_size(desc.format) else {
            anyhow::bail!("HeadlessTransferContext: unsupported image format {:?} for {}", desc.format, desc.name);
        };
        let mips = (0..desc.mip_levels)
            .map(|level| {
                let extent = mip_extent(desc.extent, level);
                vec![0; (extent.width * extent.height * extent.depth * texel_size) as usize]
            })
            .collect();
        Ok(self.images.insert(HeadlessImage {
            desc: desc.clone(),
            texel_size,
            layout: vk::ImageLayout::UNDEFINED,
            mips,
        }))
    }

    fn destroy_image(&mut self, image: GfxImageHandle) {
        if self.images.remove(image).is_none() {
            log::warn!("HeadlessTransferContext: destroy unknown image {:?}", image);
        }
    }

    fn cmd_copy_buffer(&mut self, src: GfxBufferHandle, dst: GfxBufferHandle, regions: &[vk::BufferCopy]) {
        for region in regions {
            let src_range = region.src_offset as usize..(region.src_offset + region.size) as usize;
            let dst_range = region.dst_offset as usize..(region.dst_offset + region.size) as usize;
            let bytes = self.buffers[src].data[src_range].to_vec();
            self.buffers[dst].data[dst_range].copy_from_slice(&bytes);
        }
        self.commands.push(RecordedCommand::CopyBuffer {
            src,
            dst,
            regions: regions.to_vec(),
        });
    }

    fn cmd_copy_buffer_to_image(&mut self, src: GfxBufferHandle, dst: GfxImageHandle, regions: &[vk::BufferImageCopy]) {
        let src_data = &self.buffers[src].data;
        let image = &mut self.images[dst];
        assert_eq!(
            image.layout,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            "copy into image {} which is not in TRANSFER_DST_OPTIMAL",
            image.desc.name
        );

        let texel_size = image.texel_size as usize;
        for region in regions {
            let level = region.image_subresource.mip_level;
            let extent = mip_extent(image.desc.extent, level);
            let row_length =
                if region.buffer_row_length == 0 { region.image_extent.width } else { region.buffer_row_length };
            let x = region.image_offset.x as u32;
            assert!(x + region.image_extent.width <= extent.width, "copy region exceeds mip {level} width");

            let row_bytes = region.image_extent.width as usize * texel_size;
            for row in 0..region.image_extent.height {
                let y = region.image_offset.y as u32 + row;
                assert!(y < extent.height, "copy region exceeds mip {level} height");

                let src_start = region.buffer_offset as usize + (row * row_length) as usize * texel_size;
                let dst_start = (y * extent.width + x) as usize * texel_size;
                image.mips[level as usize][dst_start..dst_start + row_bytes]
                    .copy_from_slice(&src_data[src_start..src_start + row_bytes]);
            }
        }
        self.commands.push(RecordedCommand::CopyBufferToImage {
            src,
            dst,
            regions: regions.to_vec(),
        });
    }

    fn cmd_transition_image(&mut self, image: GfxImageHandle, new_layout: vk::ImageLayout) {
        let resource = &mut self.images[image];
        let old_layout = std::mem::replace(&mut resource.layout, new_layout);
        self.commands.push(RecordedCommand::TransitionImage {
            image,
            old_layout,
            new_layout,
        });
    }

    fn cmd_bind_vertex_buffer(&mut self, buffer: GfxBufferHandle) {
        self.commands.push(RecordedCommand::BindVertexBuffer { buffer });
    }

    fn cmd_bind_index_buffer(&mut self, buffer: GfxBufferHandle, index_type: vk::IndexType) {
        self.commands.push(RecordedCommand::BindIndexBuffer { buffer, index_type });
    }
}

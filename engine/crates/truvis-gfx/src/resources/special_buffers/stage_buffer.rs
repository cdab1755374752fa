use ash::vk;

use crate::{
    context::GfxTransferContext,
    resources::{
        handles::GfxBufferHandle,
        resource_data::{BufferType, GfxBufferDesc},
    },
};

/// 资源上传使用的 staging buffer 大小
pub const RESOURCE_STAGING_BUFFER_SIZE: vk::DeviceSize = 32 * 1024 * 1024;

/// 一次 staging 空间申请的结果，`size == 0` 表示本帧的预算已经用完
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingGrant {
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

/// host 可见的线性 staging buffer，整个 buffer 的大小就是每帧的上传预算
///
/// 空间只会向后增长，由持有者在每帧开始时调用 [`Self::reset`]。
pub struct StagingBuffer {
    buffer: GfxBufferHandle,
    size: vk::DeviceSize,
    occupied: vk::DeviceSize,
}

// new & init
impl StagingBuffer {
    pub fn new(ctx: &mut dyn GfxTransferContext, name: impl AsRef<str>, size: vk::DeviceSize) -> anyhow::Result<Self> {
        let _span = truvis_crate_tools::profile_span!("StagingBuffer::new");
        let buffer = ctx.create_buffer(&GfxBufferDesc {
            name: format!("StagingBuffer::{}", name.as_ref()),
            size,
            usage: vk::BufferUsageFlags::TRANSFER_SRC,
            buffer_type: BufferType::Stage,
            host_visible: true,
        })?;
        Ok(Self {
            buffer,
            size,
            occupied: 0,
        })
    }
}

// destroy
impl StagingBuffer {
    pub fn destroy(self, ctx: &mut dyn GfxTransferContext) {
        ctx.destroy_buffer(self.buffer);
    }
}

// tools
impl StagingBuffer {
    /// 申请最多 `requested` 字节，返回实际可用的区间
    ///
    /// - 起始 offset 按 `alignment` 对齐
    /// - 空间不足时只给出剩余部分，并向下取整到 `alignment` 的倍数
    pub fn request_space(&mut self, requested: vk::DeviceSize, alignment: vk::DeviceSize) -> StagingGrant {
        let alignment = alignment.max(1);
        let offset = self.occupied.next_multiple_of(alignment).min(self.size);
        let available = self.size - offset;

        let size = if requested <= available { requested } else { available - available % alignment };
        if size == 0 {
            return StagingGrant { offset, size: 0 };
        }

        self.occupied = offset + size;
        StagingGrant { offset, size }
    }

    /// # Panics
    /// 写入范围超出 staging buffer
    pub fn write(&self, ctx: &mut dyn GfxTransferContext, offset: vk::DeviceSize, data: &[u8]) -> bool {
        assert!(
            offset + data.len() as vk::DeviceSize <= self.size,
            "StagingBuffer: write [{offset}, +{}) exceeds size {}",
            data.len(),
            self.size
        );
        ctx.write_buffer(self.buffer, offset, data)
    }

    /// 新的一帧，预算重新可用
    #[inline]
    pub fn reset(&mut self) {
        self.occupied = 0;
    }
}

// getters
impl StagingBuffer {
    #[inline]
    pub fn gfx_buffer(&self) -> GfxBufferHandle {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn occupied(&self) -> vk::DeviceSize {
        self.occupied
    }

    #[inline]
    pub fn remaining(&self) -> vk::DeviceSize {
        self.size - self.occupied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessTransferContext;

    #[test]
    fn grant_is_limited_by_budget() {
        let mut ctx = HeadlessTransferContext::new();
        let mut staging = StagingBuffer::new(&mut ctx, "test", 100).unwrap();

        assert_eq!(staging.request_space(60, 1), StagingGrant { offset: 0, size: 60 });
        assert_eq!(staging.request_space(60, 1), StagingGrant { offset: 60, size: 40 });
        assert_eq!(staging.request_space(60, 1).size, 0);
        assert_eq!(staging.remaining(), 0);

        staging.reset();
        assert_eq!(staging.request_space(10, 1), StagingGrant { offset: 0, size: 10 });
    }

    #[test]
    fn grant_respects_alignment() {
        let mut ctx = HeadlessTransferContext::new();
        let mut staging = StagingBuffer::new(&mut ctx, "test", 64).unwrap();

        assert_eq!(staging.request_space(3, 1).offset, 0);
        // offset 向上对齐到 4，剩余的 60 字节全部给出
        assert_eq!(staging.request_space(100, 4), StagingGrant { offset: 4, size: 60 });
        staging.reset();
        staging.request_space(2, 1);
        assert_eq!(staging.request_space(100, 8), StagingGrant { offset: 8, size: 56 });
        // 剩余空间不足一个对齐单位
        staging.reset();
        staging.request_space(60, 1);
        assert_eq!(staging.request_space(16, 8).size, 0);
        assert_eq!(staging.occupied(), 60);
    }

    #[test]
    fn write_lands_in_buffer() {
        let mut ctx = HeadlessTransferContext::new();
        let mut staging = StagingBuffer::new(&mut ctx, "test", 16).unwrap();
        let grant = staging.request_space(4, 4);

        assert!(staging.write(&mut ctx, grant.offset, &[1, 2, 3, 4]));
        assert_eq!(&ctx.buffer_data(staging.gfx_buffer()).unwrap()[..4], &[1, 2, 3, 4]);
    }

    #[test]
    #[should_panic(expected = "exceeds size")]
    fn write_out_of_bounds_panics() {
        let mut ctx = HeadlessTransferContext::new();
        let staging = StagingBuffer::new(&mut ctx, "test", 8).unwrap();
        staging.write(&mut ctx, 6, &[0; 4]);
    }
}

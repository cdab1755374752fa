use ash::vk;

use crate::{
    context::GfxTransferContext,
    resources::{
        free_list::{FreeList, FreeSlot},
        handles::GfxBufferHandle,
        resource_data::{BufferType, GfxBufferDesc},
    },
};

/// DynamicBuffer 的用途，决定 buffer usage 以及 `bind` 的行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicBufferType {
    Vertex,
    Index,
    /// 临时数据，没有固定的绑定点，host 可见
    Misc,
}

/// 在一个固定容量的 GPU buffer 上按元素分配区间
///
/// 多个 mesh 的顶点、索引数据会被打包进同一个大 buffer 中，
/// 通过 [`FreeList`] 管理空闲区间，释放时自动合并。
pub struct DynamicBuffer {
    name: String,
    buffer_type: DynamicBufferType,
    element_size: u32,

    buffer: Option<GfxBufferHandle>,
    free_list: FreeList,
}

impl Default for DynamicBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl DynamicBuffer {
    /// 创建一个未初始化的 DynamicBuffer，需要调用 [`Self::initialize`]
    pub fn new() -> Self {
        Self {
            name: String::new(),
            buffer_type: DynamicBufferType::Misc,
            element_size: 0,
            buffer: None,
            free_list: FreeList::new(0),
        }
    }

    /// # Panics
    /// 重复初始化
    pub fn initialize(
        &mut self,
        name: impl AsRef<str>,
        ctx: &mut dyn GfxTransferContext,
        buffer_type: DynamicBufferType,
        element_size: u32,
        element_count: u32,
    ) -> anyhow::Result<()> {
        assert!(self.buffer.is_none(), "DynamicBuffer {} is already initialized", self.name);

        let (usage, gfx_buffer_type, host_visible) = match buffer_type {
            DynamicBufferType::Vertex => (
                vk::BufferUsageFlags::VERTEX_BUFFER
                    | vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST,
                BufferType::Vertex,
                false,
            ),
            DynamicBufferType::Index => (
                vk::BufferUsageFlags::INDEX_BUFFER
                    | vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST,
                BufferType::Index,
                false,
            ),
            DynamicBufferType::Misc => (
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                BufferType::Storage,
                true,
            ),
        };

        let buffer = ctx.create_buffer(&GfxBufferDesc {
            name: format!("DynamicBuffer::{}", name.as_ref()),
            size: element_size as vk::DeviceSize * element_count as vk::DeviceSize,
            usage,
            buffer_type: gfx_buffer_type,
            host_visible,
        })?;

        self.name = name.as_ref().to_string();
        self.buffer_type = buffer_type;
        self.element_size = element_size;
        self.buffer = Some(buffer);
        self.free_list = FreeList::new(element_count);
        Ok(())
    }
}

// destroy
impl DynamicBuffer {
    pub fn destroy(&mut self, ctx: &mut dyn GfxTransferContext) {
        if let Some(buffer) = self.buffer.take() {
            ctx.destroy_buffer(buffer);
        }
        self.free_list = FreeList::new(0);
    }
}

// tools
impl DynamicBuffer {
    /// 分配 `count` 个连续元素，返回起始元素下标；空间不足时返回 `None`
    pub fn reserve(&mut self, count: u32) -> Option<u32> {
        self.assert_initialized();
        self.free_list.reserve(count)
    }

    /// 分配空间并直接写入数据，返回起始元素下标
    ///
    /// 需要 buffer 是 host 可见的；写入失败时会归还刚分配的空间
    pub fn write<T: bytemuck::Pod>(&mut self, ctx: &mut dyn GfxTransferContext, data: &[T]) -> Option<u32> {
        assert_eq!(
            size_of::<T>(),
            self.element_size as usize,
            "DynamicBuffer {}: element size mismatch",
            self.name
        );

        let count = u32::try_from(data.len()).ok()?;
        let offset = self.reserve(count)?;
        let byte_offset = offset as vk::DeviceSize * self.element_size as vk::DeviceSize;
        if !ctx.write_buffer(self.gfx_buffer(), byte_offset, bytemuck::cast_slice(data)) {
            log::error!("DynamicBuffer {}: failed to write {} elements at {}", self.name, count, offset);
            self.free_list.free(offset, count);
            return None;
        }
        Some(offset)
    }

    /// # Panics
    /// 区间与空闲区间重叠（double free）
    pub fn free(&mut self, position: u32, count: u32) {
        self.assert_initialized();
        self.free_list.free(position, count);
    }

    /// 只用于临时数据，资源数据的 buffer 不应该整体清空
    pub fn clear(&mut self) {
        self.free_list.clear();
    }

    /// # Panics
    /// `Misc` 类型没有固定的绑定点
    pub fn bind(&self, ctx: &mut dyn GfxTransferContext) {
        let buffer = self.gfx_buffer();
        match self.buffer_type {
            DynamicBufferType::Vertex => ctx.cmd_bind_vertex_buffer(buffer),
            DynamicBufferType::Index => {
                let index_type = match self.element_size {
                    2 => vk::IndexType::UINT16,
                    4 => vk::IndexType::UINT32,
                    size => panic!("DynamicBuffer {}: unsupported index size {}", self.name, size),
                };
                ctx.cmd_bind_index_buffer(buffer, index_type);
            }
            DynamicBufferType::Misc => {
                panic!("DynamicBuffer {}: cannot implicitly bind a misc buffer", self.name)
            }
        }
    }

    #[inline]
    fn assert_initialized(&self) {
        assert!(self.buffer.is_some(), "DynamicBuffer {} is not initialized", self.name);
    }
}

// getters
impl DynamicBuffer {
    /// # Panics
    /// 尚未初始化
    #[inline]
    pub fn gfx_buffer(&self) -> GfxBufferHandle {
        match self.buffer {
            Some(buffer) => buffer,
            None => panic!("DynamicBuffer {} is not initialized", self.name),
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.buffer.is_some()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn buffer_type(&self) -> DynamicBufferType {
        self.buffer_type
    }

    #[inline]
    pub fn element_size(&self) -> u32 {
        self.element_size
    }

    #[inline]
    pub fn element_count(&self) -> u32 {
        self.free_list.capacity()
    }

    pub fn get_used_elements(&self) -> u32 {
        self.free_list.used_elements()
    }

    #[inline]
    pub fn free_slots(&self) -> &[FreeSlot] {
        self.free_list.slots()
    }

    #[inline]
    pub fn free_list(&self) -> &FreeList {
        &self.free_list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessTransferContext, RecordedCommand};

    fn initialized(
        ctx: &mut HeadlessTransferContext,
        buffer_type: DynamicBufferType,
        element_size: u32,
        element_count: u32,
    ) -> DynamicBuffer {
        let mut buffer = DynamicBuffer::new();
        buffer.initialize("test", ctx, buffer_type, element_size, element_count).unwrap();
        buffer
    }

    #[test]
    fn initialize_creates_sized_buffer() {
        let mut ctx = HeadlessTransferContext::new();
        let buffer = initialized(&mut ctx, DynamicBufferType::Vertex, 48, 100);

        assert_eq!(ctx.buffer_data(buffer.gfx_buffer()).unwrap().len(), 48 * 100);
        assert_eq!(buffer.free_slots(), &[FreeSlot { start: 0, length: 100 }]);
        assert_eq!(buffer.get_used_elements(), 0);
    }

    #[test]
    #[should_panic(expected = "already initialized")]
    fn initialize_twice_panics() {
        let mut ctx = HeadlessTransferContext::new();
        let mut buffer = initialized(&mut ctx, DynamicBufferType::Index, 4, 16);
        let _ = buffer.initialize("again", &mut ctx, DynamicBufferType::Index, 4, 16);
    }

    #[test]
    fn write_places_elements_at_reserved_offset() {
        let mut ctx = HeadlessTransferContext::new();
        let mut buffer = initialized(&mut ctx, DynamicBufferType::Misc, 4, 8);

        assert_eq!(buffer.reserve(2), Some(0));
        let offset = buffer.write(&mut ctx, &[7u32, 9u32]).unwrap();
        assert_eq!(offset, 2);
        assert_eq!(buffer.get_used_elements(), 4);

        let data = ctx.buffer_data(buffer.gfx_buffer()).unwrap();
        assert_eq!(&data[8..16], bytemuck::cast_slice::<u32, u8>(&[7, 9]));
    }

    #[test]
    fn rejected_write_releases_reservation() {
        let mut ctx = HeadlessTransferContext::new();
        // Vertex buffer 不是 host 可见的，直接写入会被拒绝
        let mut buffer = initialized(&mut ctx, DynamicBufferType::Vertex, 4, 8);

        assert_eq!(buffer.write(&mut ctx, &[1.0f32, 2.0]), None);
        assert_eq!(buffer.get_used_elements(), 0);
        assert_eq!(buffer.free_slots(), &[FreeSlot { start: 0, length: 8 }]);
    }

    #[test]
    fn write_longer_than_u32_is_rejected() {
        let mut ctx = HeadlessTransferContext::new();
        // 零大小的元素不占内存，可以构造出超过 u32 范围的长度
        let mut buffer = initialized(&mut ctx, DynamicBufferType::Misc, 0, 4);
        let data = vec![(); u32::MAX as usize + 1];

        assert_eq!(buffer.write(&mut ctx, &data), None);
        assert_eq!(buffer.get_used_elements(), 0);
    }

    #[test]
    fn free_and_clear() {
        let mut ctx = HeadlessTransferContext::new();
        let mut buffer = initialized(&mut ctx, DynamicBufferType::Misc, 4, 10);
        let a = buffer.reserve(3).unwrap();
        let _b = buffer.reserve(3).unwrap();
        buffer.free(a, 3);
        assert_eq!(buffer.get_used_elements(), 3);

        buffer.clear();
        assert_eq!(buffer.get_used_elements(), 0);
        assert_eq!(buffer.free_slots().len(), 1);
    }

    #[test]
    fn bind_records_vertex_and_index() {
        let mut ctx = HeadlessTransferContext::new();
        let vertices = initialized(&mut ctx, DynamicBufferType::Vertex, 48, 4);
        let indices = initialized(&mut ctx, DynamicBufferType::Index, 4, 4);

        vertices.bind(&mut ctx);
        indices.bind(&mut ctx);

        match ctx.commands() {
            [
                RecordedCommand::BindVertexBuffer { buffer: vb },
                RecordedCommand::BindIndexBuffer {
                    buffer: ib,
                    index_type,
                },
            ] => {
                assert_eq!(*vb, vertices.gfx_buffer());
                assert_eq!(*ib, indices.gfx_buffer());
                assert_eq!(*index_type, vk::IndexType::UINT32);
            }
            other => panic!("unexpected commands: {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "misc buffer")]
    fn bind_misc_panics() {
        let mut ctx = HeadlessTransferContext::new();
        let buffer = initialized(&mut ctx, DynamicBufferType::Misc, 4, 4);
        buffer.bind(&mut ctx);
    }

    #[test]
    fn destroy_releases_gpu_buffer() {
        let mut ctx = HeadlessTransferContext::new();
        let mut buffer = initialized(&mut ctx, DynamicBufferType::Index, 4, 4);
        assert_eq!(ctx.live_buffer_count(), 1);
        buffer.destroy(&mut ctx);
        assert_eq!(ctx.live_buffer_count(), 0);
        assert!(!buffer.is_initialized());
    }
}

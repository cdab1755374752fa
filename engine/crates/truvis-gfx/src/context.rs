use ash::vk;

use crate::resources::{
    handles::{GfxBufferHandle, GfxImageHandle},
    resource_data::{GfxBufferDesc, GfxImageDesc},
};

/// 资源流式加载所依赖的 GPU 后端能力
///
/// - 资源的创建与销毁
/// - host 可见 buffer 的写入
/// - 向当前帧的 command buffer 录制 copy / barrier / bind 命令
///
/// 命令只负责录制，不会阻塞 CPU；何时 submit 以及 GPU 上的同步由调用方负责。
pub trait GfxTransferContext {
    fn create_buffer(&mut self, desc: &GfxBufferDesc) -> anyhow::Result<GfxBufferHandle>;
    fn destroy_buffer(&mut self, buffer: GfxBufferHandle);

    /// 写入 host 可见的 buffer
    ///
    /// buffer 不存在、不可映射或越界时返回 false
    fn write_buffer(&mut self, buffer: GfxBufferHandle, offset: vk::DeviceSize, data: &[u8]) -> bool;

    fn create_image(&mut self, desc: &GfxImageDesc) -> anyhow::Result<GfxImageHandle>;
    fn destroy_image(&mut self, image: GfxImageHandle);

    fn cmd_copy_buffer(&mut self, src: GfxBufferHandle, dst: GfxBufferHandle, regions: &[vk::BufferCopy]);

    /// 目标 image 需要处于 `TRANSFER_DST_OPTIMAL`
    fn cmd_copy_buffer_to_image(&mut self, src: GfxBufferHandle, dst: GfxImageHandle, regions: &[vk::BufferImageCopy]);

    /// 将 image 的所有 mip 转换到 `new_layout`，旧的 layout 由 context 跟踪
    fn cmd_transition_image(&mut self, image: GfxImageHandle, new_layout: vk::ImageLayout);

    fn cmd_bind_vertex_buffer(&mut self, buffer: GfxBufferHandle);
    fn cmd_bind_index_buffer(&mut self, buffer: GfxBufferHandle, index_type: vk::IndexType);
}

use ash::vk;

// --- Buffer Resource ---

/// Buffer 类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferType {
    /// 顶点 Buffer
    Vertex,
    /// 索引 Buffer
    Index,
    /// Storage Buffer (Structured Buffer)
    Storage,
    /// Staging Buffer (用于数据传输)
    Stage,
}

/// 创建 Buffer 所需的描述信息
#[derive(Debug, Clone)]
pub struct GfxBufferDesc {
    pub name: String,
    /// Buffer 大小（字节）
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub buffer_type: BufferType,
    /// 是否需要 host 可见并持久映射
    pub host_visible: bool,
}

// --- Image Resource ---

/// 创建 2D Image 所需的描述信息
#[derive(Debug, Clone)]
pub struct GfxImageDesc {
    pub name: String,
    /// mip 0 的尺寸
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub usage: vk::ImageUsageFlags,
}

/// 每个 texel 占用的字节数，只支持流式加载会用到的非压缩格式
pub fn format_texel_size(format: vk::Format) -> Option<u32> {
    match format {
        vk::Format::R8_UNORM | vk::Format::R8_SRGB => Some(1),
        vk::Format::R8G8_UNORM => Some(2),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R32_SFLOAT => Some(4),
        vk::Format::R16G16B16A16_SFLOAT => Some(8),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}

/// 指定 mip 等级的尺寸，最小为 1
#[inline]
pub fn mip_extent(extent: vk::Extent3D, mip_level: u32) -> vk::Extent3D {
    vk::Extent3D {
        width: (extent.width >> mip_level).max(1),
        height: (extent.height >> mip_level).max(1),
        depth: (extent.depth >> mip_level).max(1),
    }
}

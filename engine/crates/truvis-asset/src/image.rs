use std::path::PathBuf;

use ash::vk;
use truvis_gfx::resources::handles::GfxImageHandle;

use crate::handle::ResourceState;

/// 普通贴图的 mip 数量
pub const IMAGE_MIPMAP_COUNT: u32 = 4;

/// 尺寸为 `width x height` 的 image 最多能有多少个 mip
#[inline]
pub fn max_mip_levels(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// 一个 mip 的像素数据，紧密排列
#[derive(Debug, Clone)]
pub struct ImageMip {
    pub level: u32,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl ImageMip {
    #[inline]
    pub fn byte_size(&self) -> u64 {
        self.pixels.len() as u64
    }
}

/// 加载到内存中的 image 数据，`mips[i].level == i`
#[derive(Debug, Clone)]
pub struct ImagePixels {
    pub format: vk::Format,
    pub texel_size: u32,
    pub mips: Vec<ImageMip>,
}

impl ImagePixels {
    #[inline]
    pub fn mip_count(&self) -> u32 {
        self.mips.len() as u32
    }
}

#[derive(Debug, Clone)]
pub struct ImageResourceDesc {
    pub name: String,
    pub path: PathBuf,
    /// 需要生成并上传的 mip 数量，1 ~ [`IMAGE_MIPMAP_COUNT`]
    pub mip_count: u32,
    pub priority: u32,
}

impl ImageResourceDesc {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            mip_count: IMAGE_MIPMAP_COUNT,
            priority: 0,
        }
    }

    /// 编辑器使用的图标等，只有一个 mip，并且优先于场景贴图
    pub fn editor(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            mip_count: 1,
            priority: 1,
        }
    }
}

/// image 在 GPU 上的数据
///
/// 各个 mip 独立上传，`loaded_mips` 保持升序，首尾即为已就绪的最精细 / 最粗糙的 mip
#[derive(Debug, Clone)]
pub struct GpuImage {
    pub image: GfxImageHandle,
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub mip_count: u32,
    pub mip_states: Vec<ResourceState>,
    loaded_mips: Vec<u32>,
}

impl GpuImage {
    pub(crate) fn new(image: GfxImageHandle, extent: vk::Extent3D, format: vk::Format, mip_count: u32) -> Self {
        Self {
            image,
            extent,
            format,
            mip_count,
            mip_states: vec![ResourceState::MemoryLoaded; mip_count as usize],
            loaded_mips: Vec::with_capacity(mip_count as usize),
        }
    }

    pub(crate) fn mark_mip_loaded(&mut self, mip_level: u32) {
        self.mip_states[mip_level as usize] = ResourceState::Loaded;
        let index = self.loaded_mips.partition_point(|level| *level < mip_level);
        if self.loaded_mips.get(index) != Some(&mip_level) {
            self.loaded_mips.insert(index, mip_level);
        }
    }

    #[inline]
    pub fn loaded_mips(&self) -> &[u32] {
        &self.loaded_mips
    }

    /// 已就绪的最精细的 mip
    #[inline]
    pub fn min_loaded_mip(&self) -> Option<u32> {
        self.loaded_mips.first().copied()
    }

    /// 已就绪的最粗糙的 mip
    #[inline]
    pub fn max_loaded_mip(&self) -> Option<u32> {
        self.loaded_mips.last().copied()
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.loaded_mips.len() as u32 >= self.mip_count
    }
}

pub struct ImageResource {
    pub(crate) desc: ImageResourceDesc,
    pub(crate) state: ResourceState,
    pub(crate) priority: u32,

    pub(crate) pixels: Option<ImagePixels>,
    pub(crate) gpu: Option<GpuImage>,
}

// new & init
impl ImageResource {
    pub(crate) fn new(desc: ImageResourceDesc) -> Self {
        Self {
            priority: desc.priority,
            desc,
            state: ResourceState::Unloaded,
            pixels: None,
            gpu: None,
        }
    }
}

// getters
impl ImageResource {
    #[inline]
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    #[inline]
    pub fn desc(&self) -> &ImageResourceDesc {
        &self.desc
    }

    #[inline]
    pub fn state(&self) -> ResourceState {
        self.state
    }

    #[inline]
    pub fn priority(&self) -> u32 {
        self.priority
    }

    #[inline]
    pub fn pixels(&self) -> Option<&ImagePixels> {
        self.pixels.as_ref()
    }

    #[inline]
    pub fn gpu(&self) -> Option<&GpuImage> {
        self.gpu.as_ref()
    }
}

use slotmap::new_key_type;

new_key_type! { pub struct AssetMeshHandle; }
new_key_type! { pub struct AssetImageHandle; }

/// 资源加载状态机
///
/// 状态流转:
/// ```text
/// Unloaded -> ScheduledToLoad -> LoadingToMemory -> MemoryLoaded -> UploadingToGpu -> Loaded
///                                      \-> Failed
/// ```
/// mesh 的每个 submesh、image 的每个 mip 也有各自的状态，只会经历
/// `MemoryLoaded -> UploadingToGpu -> Loaded`。
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum ResourceState {
    Unknown,
    /// 初始状态，资源尚未请求加载；驱逐后也会回到这个状态
    Unloaded,
    /// 已经接受了加载请求，等待调度器在下一次 tick 提交后台任务
    ScheduledToLoad,
    /// IO 阶段：后台线程正在读取文件并解码
    LoadingToMemory,
    /// CPU 端数据已就绪，等待调度 GPU 上传
    MemoryLoaded,
    /// 正在分帧上传到 GPU，此时只有部分数据可用
    UploadingToGpu,
    /// 完成状态：GPU 资源已完全就绪
    Loaded,
    /// 失败状态：文件不存在、格式错误或解码失败
    Failed,
}

impl ResourceState {
    /// 是否处于加载流程的中间阶段，此时不允许卸载
    #[inline]
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::ScheduledToLoad | Self::LoadingToMemory | Self::MemoryLoaded | Self::UploadingToGpu)
    }
}

//! tracy 性能分析的辅助宏
//!
//! `tracy_client::span!` 要求 tracy client 已经启动，否则会 panic。
//! 单元测试和命令行工具中通常没有启动 client，因此这里只在 client 运行时才创建 span。

#[doc(hidden)]
pub use tracy_client;

/// 创建一个 tracy span，返回 `Option<tracy_client::Span>`
///
/// 需要绑定到变量上才能覆盖整个作用域：
/// ```ignore
/// let _span = truvis_crate_tools::profile_span!("ResourceManager::tick");
/// ```
#[macro_export]
macro_rules! profile_span {
    ($name:literal) => {
        $crate::profiling::tracy_client::Client::running()
            .map(|client| client.span($crate::profiling::tracy_client::span_location!($name), 0))
    };
}

/// 启动 tracy client，之后的 `profile_span!` 才会真正记录数据
pub fn start_profiler() {
    let _ = tracy_client::Client::start();
}

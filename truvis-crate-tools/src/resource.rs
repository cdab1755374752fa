use std::path::{Path, PathBuf};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
///
/// # 使用示例
/// ```ignore
/// let model = TruvisPath::assets_path("sponza.glb");            // assets/sponza.glb
/// let cached = TruvisPath::asset_cache_path("8f3a.mesh.toml");  // assets/.cache/8f3a.mesh.toml
/// ```
pub struct TruvisPath {}
// 核心路径
impl TruvisPath {
    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.parent().unwrap_or(manifest_dir).to_path_buf()
    }

    pub fn target_path() -> PathBuf {
        Self::workspace_path().join("target")
    }
}
// 资源目录
impl TruvisPath {
    /// 获取 `assets/` 目录下的文件路径
    pub fn assets_path(filename: &str) -> PathBuf {
        Self::workspace_path().join("assets").join(filename)
    }

    /// 离线处理后的资源缓存目录：`assets/.cache/`
    pub fn asset_cache_dir() -> PathBuf {
        Self::workspace_path().join("assets").join(".cache")
    }

    pub fn asset_cache_path(filename: &str) -> PathBuf {
        Self::asset_cache_dir().join(filename)
    }
}

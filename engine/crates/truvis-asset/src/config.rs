use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use truvis_crate_tools::resource::TruvisPath;

use crate::mesh::MeshResourceDesc;

/// 流式加载系统的配置
///
/// ```toml
/// [mesh_buffers]
/// vertex_capacity = 4194304
/// index_capacity = 12582912
///
/// [staging]
/// budget_bytes = 33554432
///
/// [loader]
/// worker_threads = 0
/// asset_cache_dir = "assets/.cache"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub mesh_buffers: MeshBufferConfig,
    pub staging: StagingConfig,
    pub loader: LoaderConfig,
}

/// 共享顶点 / 索引 buffer 的容量，单位是元素个数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshBufferConfig {
    pub vertex_capacity: u32,
    pub index_capacity: u32,
}

impl Default for MeshBufferConfig {
    fn default() -> Self {
        Self {
            vertex_capacity: 4 * 1024 * 1024,
            index_capacity: 12 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// 每帧可用于上传的字节数，也就是资源 staging buffer 的大小
    pub budget_bytes: u64,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            budget_bytes: truvis_gfx::resources::special_buffers::stage_buffer::RESOURCE_STAGING_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// 0 表示使用 rayon 的默认线程数
    pub worker_threads: usize,
    /// 相对路径基于工作区根目录
    pub asset_cache_dir: PathBuf,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            asset_cache_dir: PathBuf::from("assets/.cache"),
        }
    }
}

impl StreamingConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).with_context(|| format!("读取配置文件失败: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content).with_context(|| format!("解析 TOML 配置失败: {:?}", path.as_ref()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// 资源缓存目录的绝对路径
    pub fn asset_cache_dir(&self) -> PathBuf {
        if self.loader.asset_cache_dir.is_absolute() {
            self.loader.asset_cache_dir.clone()
        } else {
            TruvisPath::workspace_path().join(&self.loader.asset_cache_dir)
        }
    }
}

/// 资源缓存中一个 mesh 的描述文件：`<cache>/<mesh_id>.mesh.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshResourceConfig {
    pub version: u32,
    pub name: String,
    pub mesh_id: String,
    pub asset_hash: String,
    pub source_file: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

impl MeshResourceConfig {
    pub const VERSION: u32 = 1;

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).with_context(|| format!("读取配置文件失败: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content).with_context(|| format!("解析 mesh 配置失败: {:?}", path.as_ref()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        anyhow::ensure!(
            config.version == Self::VERSION,
            "不支持的 mesh 配置版本: {}，需要 {}",
            config.version,
            Self::VERSION
        );
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path.as_ref(), content).with_context(|| format!("写入配置文件失败: {:?}", path.as_ref()))?;
        Ok(())
    }

    pub fn sidecar_path(asset_cache_dir: &Path, mesh_id: &str) -> PathBuf {
        asset_cache_dir.join(format!("{}.mesh.toml", mesh_id))
    }

    pub fn mesh_path(&self, asset_cache_dir: &Path) -> PathBuf {
        asset_cache_dir.join(format!("{}.glb", self.mesh_id))
    }

    pub fn to_desc(&self, asset_cache_dir: &Path) -> MeshResourceDesc {
        MeshResourceDesc {
            name: self.name.clone(),
            mesh_path: self.mesh_path(asset_cache_dir),
            asset_hash: Some(self.asset_hash.clone()),
            source_file: Some(self.source_file.clone()),
            priority: self.priority.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESH_TOML: &str = r#"
version = 1
name = "sponza"
mesh_id = "8f3a"
asset_hash = "c0ffee"
source_file = "assets/sponza/sponza.gltf"
priority = 5
"#;

    #[test]
    fn empty_streaming_config_uses_defaults() {
        let config = StreamingConfig::from_toml_str("").unwrap();
        assert_eq!(config, StreamingConfig::default());
        assert_eq!(config.mesh_buffers.vertex_capacity, 4_194_304);
        assert_eq!(config.mesh_buffers.index_capacity, 12_582_912);
        assert_eq!(config.staging.budget_bytes, 32 * 1024 * 1024);
    }

    #[test]
    fn partial_streaming_config_keeps_other_defaults() {
        let config = StreamingConfig::from_toml_str(
            r#"
[staging]
budget_bytes = 4096

[loader]
asset_cache_dir = "/tmp/cache"
"#,
        )
        .unwrap();
        assert_eq!(config.staging.budget_bytes, 4096);
        assert_eq!(config.mesh_buffers, MeshBufferConfig::default());
        assert_eq!(config.asset_cache_dir(), PathBuf::from("/tmp/cache"));
        assert!(StreamingConfig::default().asset_cache_dir().ends_with("assets/.cache"));
    }

    #[test]
    fn mesh_config_resolves_cache_paths() {
        let config = MeshResourceConfig::from_toml_str(MESH_TOML).unwrap();
        let cache = Path::new("/cache");
        let desc = config.to_desc(cache);

        assert_eq!(desc.name, "sponza");
        assert_eq!(desc.mesh_path, PathBuf::from("/cache/8f3a.glb"));
        assert_eq!(desc.asset_hash.as_deref(), Some("c0ffee"));
        assert_eq!(desc.priority, 5);
        assert_eq!(MeshResourceConfig::sidecar_path(cache, "8f3a"), PathBuf::from("/cache/8f3a.mesh.toml"));
    }

    #[test]
    fn mesh_config_rejects_other_versions() {
        let err = MeshResourceConfig::from_toml_str(&MESH_TOML.replace("version = 1", "version = 2")).unwrap_err();
        assert!(err.to_string().contains("版本"));
    }

    #[test]
    fn mesh_config_survives_a_save() {
        let config = MeshResourceConfig {
            priority: None,
            ..MeshResourceConfig::from_toml_str(MESH_TOML).unwrap()
        };
        let path = std::env::temp_dir().join(format!("truvis-asset-{}.mesh.toml", std::process::id()));
        config.save_to_file(&path).unwrap();
        let loaded = MeshResourceConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, config);
        assert_eq!(loaded.to_desc(Path::new("/c")).priority, 0);
    }
}

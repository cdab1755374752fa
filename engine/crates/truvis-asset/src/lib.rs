//! 资源流式加载
//!
//! 以 [`resource_manager::ResourceManager`] 为入口，把 mesh 和 image 从磁盘搬到 GPU：
//!
//! 1. `load_*_resource` 把资源加入待加载集合，由 [`asset_loader::AssetLoader`] 在后台线程解码
//! 2. 每帧 `tick` 收集解码结果，把 GPU 上传拆成按优先级排序的 [`upload_queue::UploadQueue`]
//! 3. 上传受 staging buffer 的每帧预算限制，放不下的部分在下一帧接着传
//! 4. 顶点/索引 buffer 空间不足时，按优先级驱逐已经常驻的 mesh
//!
//! # 使用示例
//! ```ignore
//! let loader = AssetLoader::new(Arc::new(FileAssetSource), 0)?;
//! let mut manager = ResourceManager::new(&mut ctx, &config, loader)?;
//! let mesh = manager.create_mesh_resource(MeshResourceDesc { .. });
//! manager.load_mesh_resource(mesh);
//!
//! // 每帧
//! staging.reset();
//! manager.tick(delta_seconds, &mut ctx, &mut staging);
//! ```

pub mod asset_loader;
pub mod asset_source;
pub mod config;
pub mod eviction;
pub mod handle;
pub mod image;
pub mod load_scheduler;
pub mod mesh;
pub mod priority;
pub mod resource_manager;
pub mod upload_queue;
pub mod upload_scheduler;

#[cfg(test)]
mod test_support;

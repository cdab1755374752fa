//! 在 headless context 上跑一遍流式加载，打印每帧的上传情况
//!
//! 用法：`stream-preview <streaming.toml> [xxx.mesh.toml | image]...`

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use truvis_asset::{
    asset_loader::AssetLoader,
    asset_source::FileAssetSource,
    config::{MeshResourceConfig, StreamingConfig},
    handle::ResourceState,
    image::ImageResourceDesc,
    resource_manager::ResourceManager,
};
use truvis_gfx::{headless::HeadlessTransferContext, resources::special_buffers::stage_buffer::StagingBuffer};

const MAX_TICKS: usize = 10_000;

fn is_settled(state: ResourceState) -> bool {
    matches!(state, ResourceState::Loaded | ResourceState::Failed)
}

fn main() -> anyhow::Result<()> {
    truvis_crate_tools::init_log::init_log();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().context("usage: stream-preview <streaming.toml> [xxx.mesh.toml | image]...")?;
    let config = StreamingConfig::from_file(&config_path)?;
    let asset_cache_dir = config.asset_cache_dir();
    log::info!("streaming config: {:?}", config);

    let mut ctx = HeadlessTransferContext::new();
    let loader = AssetLoader::new(Arc::new(FileAssetSource), config.loader.worker_threads)?;
    let mut manager = ResourceManager::new(&mut ctx, &config, loader)?;
    let mut staging = StagingBuffer::new(&mut ctx, "stream-preview-staging", config.staging.budget_bytes)?;

    let mut meshes = Vec::new();
    let mut images = Vec::new();
    for arg in args {
        let path = PathBuf::from(&arg);
        if arg.ends_with(".mesh.toml") {
            let mesh_config = MeshResourceConfig::from_file(&path)?;
            let handle = manager.create_mesh_resource_from_config(&mesh_config, &asset_cache_dir);
            manager.load_mesh_resource(handle);
            meshes.push(handle);
        } else {
            let name = path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_else(|| arg.clone());
            let handle = manager.create_image_resource(ImageResourceDesc::new(name, path));
            manager.load_image_resource(handle);
            images.push(handle);
        }
    }

    let mut tick_count = 0;
    loop {
        let all_settled = meshes.iter().all(|&h| is_settled(manager.mesh_state(h)))
            && images.iter().all(|&h| is_settled(manager.image_state(h)));
        if all_settled {
            break;
        }
        if tick_count >= MAX_TICKS {
            log::warn!("stop after {} ticks, some resources are still streaming", tick_count);
            break;
        }

        staging.reset();
        manager.tick(1.0 / 60.0, &mut ctx, &mut staging);
        tick_count += 1;

        let stats = manager.stats();
        log::info!(
            "tick {}: staged {} bytes, {} uploads queued, vertex {}/{}, index {}/{}",
            tick_count,
            stats.staged_bytes_last_tick,
            stats.queued_uploads,
            stats.vertex_used,
            stats.vertex_capacity,
            stats.index_used,
            stats.index_capacity
        );

        // 后台线程还没解码完时，不要空转
        if stats.queued_uploads == 0 && (stats.pending_mesh_loads > 0 || stats.pending_image_loads > 0) {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    for &handle in &meshes {
        if let Some(mesh) = manager.mesh(handle) {
            log::info!("mesh {}: {:?}", mesh.name(), mesh.state());
        }
    }
    for &handle in &images {
        if let Some(image) = manager.image(handle) {
            log::info!("image {}: {:?}", image.name(), image.state());
        }
    }
    log::info!("final stats: {:?}", manager.stats());

    staging.destroy(&mut ctx);
    manager.destroy(&mut ctx);
    Ok(())
}

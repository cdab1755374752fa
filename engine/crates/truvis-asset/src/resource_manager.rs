use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use slotmap::SlotMap;
use truvis_gfx::{
    context::GfxTransferContext,
    resources::{
        dynamic_buffer::{DynamicBuffer, DynamicBufferType},
        special_buffers::stage_buffer::StagingBuffer,
    },
};

use crate::{
    asset_loader::AssetLoader,
    config::{MeshResourceConfig, StreamingConfig},
    eviction::ResidencyQueue,
    handle::{AssetImageHandle, AssetMeshHandle, ResourceState},
    image::{ImageResource, ImageResourceDesc},
    load_scheduler::LoadSchedules,
    mesh::{INDEX_SIZE, MeshResource, MeshResourceDesc, Vertex},
    upload_queue::UploadQueue,
};

/// 某一时刻流式加载系统的概况
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceManagerStats {
    pub pending_mesh_loads: usize,
    pub pending_image_loads: usize,
    pub queued_uploads: usize,
    /// 上一次 tick 占用的 staging 字节数
    pub staged_bytes_last_tick: u64,
    pub vertex_used: u32,
    pub vertex_capacity: u32,
    pub index_used: u32,
    pub index_capacity: u32,
    pub resident_meshes: usize,
    pub resident_images: usize,
}

/// 流式资源管理器
///
/// 负责 mesh 与 image 资源从磁盘到 GPU 的整个流程：
/// 1. `load_*_resource` 只是登记请求，真正的调度发生在 [`Self::tick`] 中
/// 2. 后台线程读取并解码文件，结果通过 channel 交还主线程
/// 3. CPU 数据就绪后拆分为上传单元放入优先级队列，每帧在 staging 预算内分批上传
/// 4. 共享的顶点 / 索引 buffer 空间不足时，驱逐优先级更低的常驻 mesh
///
/// 所有状态只在主线程上修改。
pub struct ResourceManager {
    pub(crate) meshes: SlotMap<AssetMeshHandle, MeshResource>,
    pub(crate) images: SlotMap<AssetImageHandle, ImageResource>,

    /// 路径到句柄的映射，用于去重
    mesh_cache: HashMap<PathBuf, AssetMeshHandle>,
    image_cache: HashMap<PathBuf, AssetImageHandle>,

    pub(crate) vertex_buffer: DynamicBuffer,
    pub(crate) index_buffer: DynamicBuffer,

    pub(crate) load_schedules: LoadSchedules,
    pub(crate) upload_queue: UploadQueue,
    pub(crate) residency: ResidencyQueue,

    pub(crate) asset_loader: AssetLoader,

    pub(crate) last_tick_staged_bytes: u64,
}

// new & init
impl ResourceManager {
    pub fn new(
        ctx: &mut dyn GfxTransferContext,
        config: &StreamingConfig,
        asset_loader: AssetLoader,
    ) -> anyhow::Result<Self> {
        let mut vertex_buffer = DynamicBuffer::new();
        vertex_buffer.initialize(
            "resource-vertex",
            ctx,
            DynamicBufferType::Vertex,
            Vertex::SIZE,
            config.mesh_buffers.vertex_capacity,
        )?;

        let mut index_buffer = DynamicBuffer::new();
        if let Err(e) = index_buffer.initialize(
            "resource-index",
            ctx,
            DynamicBufferType::Index,
            INDEX_SIZE,
            config.mesh_buffers.index_capacity,
        ) {
            vertex_buffer.destroy(ctx);
            return Err(e);
        }

        log::info!(
            "ResourceManager created: {} vertices, {} indices",
            config.mesh_buffers.vertex_capacity,
            config.mesh_buffers.index_capacity
        );

        Ok(Self {
            meshes: SlotMap::with_key(),
            images: SlotMap::with_key(),
            mesh_cache: HashMap::new(),
            image_cache: HashMap::new(),
            vertex_buffer,
            index_buffer,
            load_schedules: LoadSchedules::default(),
            upload_queue: UploadQueue::new(),
            residency: ResidencyQueue::default(),
            asset_loader,
            last_tick_staged_bytes: 0,
        })
    }
}

// destroy
impl ResourceManager {
    /// 释放所有 GPU 资源，后台线程会在 loader drop 时等待任务结束
    pub fn destroy(mut self, ctx: &mut dyn GfxTransferContext) {
        for image in self.images.values_mut() {
            if let Some(gpu) = image.gpu.take() {
                ctx.destroy_image(gpu.image);
            }
        }
        self.vertex_buffer.destroy(ctx);
        self.index_buffer.destroy(ctx);
    }
}

// tools
impl ResourceManager {
    /// 创建 mesh 资源，初始状态为 Unloaded；同一路径只会创建一次
    pub fn create_mesh_resource(&mut self, desc: MeshResourceDesc) -> AssetMeshHandle {
        if let Some(&handle) = self.mesh_cache.get(&desc.mesh_path) {
            return handle;
        }

        let path = desc.mesh_path.clone();
        let handle = self.meshes.insert(MeshResource::new(desc));
        self.mesh_cache.insert(path, handle);
        handle
    }

    pub fn create_mesh_resource_from_config(
        &mut self,
        config: &MeshResourceConfig,
        asset_cache_dir: &Path,
    ) -> AssetMeshHandle {
        self.create_mesh_resource(config.to_desc(asset_cache_dir))
    }

    pub fn create_image_resource(&mut self, desc: ImageResourceDesc) -> AssetImageHandle {
        if let Some(&handle) = self.image_cache.get(&desc.path) {
            return handle;
        }

        let path = desc.path.clone();
        let handle = self.images.insert(ImageResource::new(desc));
        self.image_cache.insert(path, handle);
        handle
    }

    /// 编辑器使用的 image：只有一个 mip
    pub fn create_editor_image_resource(
        &mut self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> AssetImageHandle {
        self.create_image_resource(ImageResourceDesc::editor(name, path))
    }

    /// 请求加载 mesh
    ///
    /// 只接受 Unloaded 状态的资源，其余情况返回 false 且没有任何副作用
    pub fn load_mesh_resource(&mut self, handle: AssetMeshHandle) -> bool {
        let Some(mesh) = self.meshes.get_mut(handle) else {
            return false;
        };
        if mesh.state != ResourceState::Unloaded {
            return false;
        }

        mesh.state = ResourceState::ScheduledToLoad;
        self.load_schedules.meshes.insert(handle);
        true
    }

    pub fn load_image_resource(&mut self, handle: AssetImageHandle) -> bool {
        let Some(image) = self.images.get_mut(handle) else {
            return false;
        };
        if image.state != ResourceState::Unloaded {
            return false;
        }

        image.state = ResourceState::ScheduledToLoad;
        self.load_schedules.images.insert(handle);
        true
    }

    /// 每帧调用一次
    ///
    /// 1. 取回后台加载的结果
    /// 2. 推进 mesh / image 的加载调度
    /// 3. 在 staging buffer 的剩余空间内上传数据
    ///
    /// staging buffer 由调用者持有，并在每帧开始时 reset
    pub fn tick(&mut self, _delta_seconds: f32, ctx: &mut dyn GfxTransferContext, staging: &mut StagingBuffer) {
        let _span = truvis_crate_tools::profile_span!("ResourceManager::tick");

        self.collect_load_results();
        self.meshes_tick();
        self.images_tick(ctx);
        self.uploads_tick(ctx, staging);
    }

    /// 只影响之后才进入上传队列的条目；常驻的 mesh 会以新的优先级参与驱逐
    pub fn set_mesh_priority(&mut self, handle: AssetMeshHandle, priority: u32) -> bool {
        let Some(mesh) = self.meshes.get_mut(handle) else {
            return false;
        };
        mesh.priority = priority;
        if mesh.state == ResourceState::Loaded {
            self.mark_mesh_resident(handle);
        }
        true
    }

    pub fn set_image_priority(&mut self, handle: AssetImageHandle, priority: u32) -> bool {
        let Some(image) = self.images.get_mut(handle) else {
            return false;
        };
        image.priority = priority;
        true
    }
}

// getters
impl ResourceManager {
    #[inline]
    pub fn mesh(&self, handle: AssetMeshHandle) -> Option<&MeshResource> {
        self.meshes.get(handle)
    }

    #[inline]
    pub fn image(&self, handle: AssetImageHandle) -> Option<&ImageResource> {
        self.images.get(handle)
    }

    /// 句柄无效时返回 Unknown
    #[inline]
    pub fn mesh_state(&self, handle: AssetMeshHandle) -> ResourceState {
        self.meshes.get(handle).map_or(ResourceState::Unknown, MeshResource::state)
    }

    #[inline]
    pub fn image_state(&self, handle: AssetImageHandle) -> ResourceState {
        self.images.get(handle).map_or(ResourceState::Unknown, ImageResource::state)
    }

    #[inline]
    pub fn vertex_buffer(&self) -> &DynamicBuffer {
        &self.vertex_buffer
    }

    #[inline]
    pub fn index_buffer(&self) -> &DynamicBuffer {
        &self.index_buffer
    }

    #[inline]
    pub fn upload_queue(&self) -> &UploadQueue {
        &self.upload_queue
    }

    #[inline]
    pub fn upload_queue_len(&self) -> usize {
        self.upload_queue.len()
    }

    pub fn stats(&self) -> ResourceManagerStats {
        ResourceManagerStats {
            pending_mesh_loads: self.load_schedules.meshes.len(),
            pending_image_loads: self.load_schedules.images.len(),
            queued_uploads: self.upload_queue.len(),
            staged_bytes_last_tick: self.last_tick_staged_bytes,
            vertex_used: self.vertex_buffer.get_used_elements(),
            vertex_capacity: self.vertex_buffer.element_count(),
            index_used: self.index_buffer.get_used_elements(),
            index_capacity: self.index_buffer.element_count(),
            resident_meshes: self.meshes.values().filter(|mesh| mesh.state == ResourceState::Loaded).count(),
            resident_images: self.images.values().filter(|image| image.state == ResourceState::Loaded).count(),
        }
    }
}

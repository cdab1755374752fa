use std::{cmp::Reverse, collections::BinaryHeap};

use slotmap::SlotMap;
use truvis_gfx::{context::GfxTransferContext, resources::free_list::FreeList};

use crate::{
    handle::{AssetImageHandle, AssetMeshHandle, ResourceState},
    mesh::MeshResource,
    priority::ResidencyPriority,
    resource_manager::ResourceManager,
};

/// 常驻 GPU 的 mesh
///
/// `epoch` 与 mesh 当前的 `residency_epoch` 不一致时，说明条目已经过期
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct ResidentMesh {
    pub priority: ResidencyPriority,
    pub epoch: u64,
    pub mesh: AssetMeshHandle,
}

impl ResidentMesh {
    fn is_valid(&self, meshes: &SlotMap<AssetMeshHandle, MeshResource>) -> bool {
        meshes
            .get(self.mesh)
            .is_some_and(|mesh| mesh.state == ResourceState::Loaded && mesh.residency_epoch == self.epoch)
    }
}

/// 按驻留优先级排序的最小堆，堆顶是最先被驱逐的 mesh
///
/// 过期条目不会立即删除，数量过多时由 [`Self::retain`] 统一清理
#[derive(Default, Clone)]
pub(crate) struct ResidencyQueue {
    heap: BinaryHeap<Reverse<ResidentMesh>>,
}

impl ResidencyQueue {
    #[inline]
    pub fn push(&mut self, resident: ResidentMesh) {
        self.heap.push(Reverse(resident));
    }

    #[inline]
    pub fn pop(&mut self) -> Option<ResidentMesh> {
        self.heap.pop().map(|Reverse(resident)| resident)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn retain(&mut self, mut f: impl FnMut(&ResidentMesh) -> bool) {
        self.heap.retain(|Reverse(resident)| f(resident));
    }
}

/// 在空闲链表的副本上释放 mesh 占用的区间
fn simulate_unload(mesh: &MeshResource, vertex_list: &mut FreeList, index_list: &mut FreeList) {
    let Some(gpu) = mesh.gpu.as_ref() else {
        return;
    };
    for submesh in gpu.submeshes.iter().filter(|submesh| submesh.allocated) {
        vertex_list.free(submesh.vertex_start, submesh.vertex_count);
        index_list.free(submesh.index_start, submesh.index_count);
    }
}

impl ResourceManager {
    /// 为一个上传单元在顶点、索引 buffer 中分配空间，必要时驱逐优先级更低的 mesh
    ///
    /// 先在空闲链表的副本上确定要驱逐哪些 mesh，只有两个 buffer 都能分配成功时才真正卸载；
    /// 失败时不会卸载任何 mesh，也不会修改空闲链表
    pub(crate) fn request_mesh_buffer_space(
        &mut self,
        requester: ResidencyPriority,
        vertex_count: u32,
        index_count: u32,
    ) -> Option<(u32, u32)> {
        let vertex_capacity = self.vertex_buffer.element_count();
        let index_capacity = self.index_buffer.element_count();
        if vertex_count > vertex_capacity || index_count > index_capacity {
            log::warn!(
                "Mesh buffers: {} vertices / {} indices exceed capacity {} / {}",
                vertex_count,
                index_count,
                vertex_capacity,
                index_capacity
            );
            return None;
        }

        let victims = self.plan_mesh_eviction(requester, vertex_count, index_count)?;
        for victim in victims {
            if let Some(mesh) = self.meshes.get(victim.mesh) {
                log::info!("Evict mesh {} ({:?}) for {:?}", mesh.desc.name, victim.priority, requester);
            }
            self.unload_mesh_resource(victim.mesh);
        }

        // 空闲链表与模拟时的副本一致，下面的分配必然成功
        let vertex_start = self.vertex_buffer.reserve(vertex_count)?;
        let Some(index_start) = self.index_buffer.reserve(index_count) else {
            self.vertex_buffer.free(vertex_start, vertex_count);
            return None;
        };
        Some((vertex_start, index_start))
    }

    /// 按驻留优先级从低到高依次模拟驱逐，直到两个 buffer 都放得下
    ///
    /// 遇到优先级不低于请求者的 mesh，或者没有可驱逐的 mesh 时返回 `None`
    fn plan_mesh_eviction(
        &self,
        requester: ResidencyPriority,
        vertex_count: u32,
        index_count: u32,
    ) -> Option<Vec<ResidentMesh>> {
        let mut vertex_list = self.vertex_buffer.free_list().clone();
        let mut index_list = self.index_buffer.free_list().clone();
        let mut candidates = self.residency.clone();
        let mut victims = Vec::new();

        loop {
            // first-fit 能否成功只取决于最大的空闲区间
            if vertex_list.largest_free_range() >= vertex_count && index_list.largest_free_range() >= index_count {
                return Some(victims);
            }

            let Some(victim) = std::iter::from_fn(|| candidates.pop()).find(|resident| resident.is_valid(&self.meshes))
            else {
                log::warn!(
                    "Mesh buffers: cannot reserve {} vertices / {} indices, nothing to evict",
                    vertex_count,
                    index_count
                );
                return None;
            };
            if victim.priority >= requester {
                log::warn!(
                    "Mesh buffers: cannot reserve {} vertices / {} indices, lowest resident {:?} is not below {:?}",
                    vertex_count,
                    index_count,
                    victim.priority,
                    requester
                );
                return None;
            }

            if let Some(mesh) = self.meshes.get(victim.mesh) {
                simulate_unload(mesh, &mut vertex_list, &mut index_list);
            }
            victims.push(victim);
        }
    }

    /// 以 mesh 当前的优先级进入驻留队列，之前的条目随之过期
    ///
    /// 队列长度超过 mesh 总数的两倍时清理过期条目
    pub(crate) fn mark_mesh_resident(&mut self, handle: AssetMeshHandle) {
        let Some(mesh) = self.meshes.get_mut(handle) else {
            return;
        };
        mesh.residency_epoch += 1;
        self.residency.push(ResidentMesh {
            priority: ResidencyPriority {
                lod: 0,
                resource: mesh.priority,
            },
            epoch: mesh.residency_epoch,
            mesh: handle,
        });

        if self.residency.len() > 2 * self.meshes.len() {
            let meshes = &self.meshes;
            self.residency.retain(|resident| resident.is_valid(meshes));
        }
    }

    /// 卸载 mesh，归还它在顶点 / 索引 buffer 中的空间
    ///
    /// 只有 Loaded 的 mesh 可以卸载，其余状态返回 false
    pub fn unload_mesh_resource(&mut self, handle: AssetMeshHandle) -> bool {
        let Some(mesh) = self.meshes.get_mut(handle) else {
            return false;
        };
        if mesh.state.is_in_flight() {
            log::warn!("Mesh {} is {:?}, cannot unload while loading", mesh.desc.name, mesh.state);
            return false;
        }
        if mesh.state != ResourceState::Loaded {
            return false;
        }

        if let Some(gpu) = mesh.gpu.take() {
            for submesh in gpu.submeshes.iter().filter(|submesh| submesh.allocated) {
                self.vertex_buffer.free(submesh.vertex_start, submesh.vertex_count);
                self.index_buffer.free(submesh.index_start, submesh.index_count);
            }
        }
        mesh.geometry = None;
        mesh.state = ResourceState::Unloaded;
        true
    }

    /// 卸载 image；Loaded 的 image 会销毁 GPU 资源并回到 Unloaded
    ///
    /// 总是返回 true
    pub fn unload_image_resource(&mut self, ctx: &mut dyn GfxTransferContext, handle: AssetImageHandle) -> bool {
        if let Some(image) = self.images.get_mut(handle)
            && image.state == ResourceState::Loaded
        {
            if let Some(gpu) = image.gpu.take() {
                ctx.destroy_image(gpu.image);
            }
            image.pixels = None;
            image.state = ResourceState::Unloaded;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use slotmap::SlotMap;
    use truvis_gfx::{headless::HeadlessTransferContext, resources::special_buffers::stage_buffer::StagingBuffer};

    use super::*;
    use crate::{
        image::ImageResourceDesc,
        test_support::{MemoryAssetSource, headless_manager, mesh_desc, tick},
    };

    fn load_to_end(
        manager: &mut ResourceManager,
        ctx: &mut HeadlessTransferContext,
        staging: &mut StagingBuffer,
        handle: AssetMeshHandle,
    ) {
        assert!(manager.load_mesh_resource(handle));
        tick(manager, ctx, staging);
        tick(manager, ctx, staging);
    }

    #[test]
    fn residency_queue_pops_lowest_first() {
        let mut meshes: SlotMap<AssetMeshHandle, ()> = SlotMap::with_key();
        let mut queue = ResidencyQueue::default();
        for resource in [5, 1, 9] {
            queue.push(ResidentMesh {
                priority: ResidencyPriority { lod: 0, resource },
                epoch: 1,
                mesh: meshes.insert(()),
            });
        }
        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|resident| resident.priority.resource).collect();
        assert_eq!(order, vec![1, 5, 9]);
    }

    #[test]
    fn equal_priority_resident_is_not_evicted() {
        let source = Arc::new(MemoryAssetSource::new());
        source.insert_mesh("a.glb", MemoryAssetSource::mesh(&[(4, 6)]));
        source.insert_mesh("b.glb", MemoryAssetSource::mesh(&[(4, 6)]));
        let (mut manager, mut ctx, mut staging) = headless_manager(source, 4, 6, 4096);
        let a = manager.create_mesh_resource(mesh_desc("a.glb", 5));
        let b = manager.create_mesh_resource(mesh_desc("b.glb", 5));
        load_to_end(&mut manager, &mut ctx, &mut staging, a);
        assert_eq!(manager.mesh_state(a), ResourceState::Loaded);

        load_to_end(&mut manager, &mut ctx, &mut staging, b);
        tick(&mut manager, &mut ctx, &mut staging);

        assert_eq!(manager.mesh_state(a), ResourceState::Loaded);
        assert_eq!(manager.mesh_state(b), ResourceState::UploadingToGpu);
        assert!(!manager.mesh(b).unwrap().gpu().unwrap().submeshes[0].allocated);
        assert!(manager.vertex_buffer().free_slots().is_empty());
        assert!(manager.index_buffer().free_slots().is_empty());

        // 被拒绝后 wait 清零，随后的老化只加 1
        assert_eq!(manager.upload_queue().peek().unwrap().priority.wait, 1);
    }

    #[test]
    fn higher_priority_request_evicts_lower_resident() {
        let b_geometry = MemoryAssetSource::mesh(&[(1, 1), (3, 5)]);
        let source = Arc::new(MemoryAssetSource::new());
        source.insert_mesh("a.glb", MemoryAssetSource::mesh(&[(4, 6)]));
        source.insert_mesh("b.glb", b_geometry.clone());
        let (mut manager, mut ctx, mut staging) = headless_manager(source, 4, 6, 4096);
        let a = manager.create_mesh_resource(mesh_desc("a.glb", 1));
        let b = manager.create_mesh_resource(mesh_desc("b.glb", 9));
        load_to_end(&mut manager, &mut ctx, &mut staging, a);

        load_to_end(&mut manager, &mut ctx, &mut staging, b);

        assert_eq!(manager.mesh_state(b), ResourceState::Loaded);
        assert_eq!(manager.mesh_state(a), ResourceState::Unloaded);
        assert!(manager.mesh(a).unwrap().gpu().is_none());
        assert_eq!(manager.stats().resident_meshes, 1);

        let vertex_bytes: Vec<u8> = b_geometry
            .submeshes
            .iter()
            .flat_map(|submesh| bytemuck::cast_slice::<_, u8>(&submesh.mesh_infos[0].vertices).to_vec())
            .collect();
        assert_eq!(ctx.buffer_data(manager.vertex_buffer().gfx_buffer()).unwrap(), vertex_bytes.as_slice());

        // 低优先级的 mesh 无法反过来驱逐高优先级的 mesh
        load_to_end(&mut manager, &mut ctx, &mut staging, a);
        assert_eq!(manager.mesh_state(a), ResourceState::UploadingToGpu);
        assert_eq!(manager.mesh_state(b), ResourceState::Loaded);
    }

    #[test]
    fn refused_request_leaves_residents_and_free_lists_untouched() {
        let source = Arc::new(MemoryAssetSource::new());
        source.insert_mesh("a.glb", MemoryAssetSource::mesh(&[(2, 3)]));
        source.insert_mesh("b.glb", MemoryAssetSource::mesh(&[(2, 9)]));
        source.insert_mesh("c.glb", MemoryAssetSource::mesh(&[(2, 6)]));
        let (mut manager, mut ctx, mut staging) = headless_manager(source, 4, 12, 4096);
        let a = manager.create_mesh_resource(mesh_desc("a.glb", 1));
        let b = manager.create_mesh_resource(mesh_desc("b.glb", 9));
        let c = manager.create_mesh_resource(mesh_desc("c.glb", 5));
        load_to_end(&mut manager, &mut ctx, &mut staging, a);
        load_to_end(&mut manager, &mut ctx, &mut staging, b);
        assert!(manager.vertex_buffer().free_slots().is_empty());
        assert!(manager.index_buffer().free_slots().is_empty());

        // 驱逐 a 可以腾出顶点空间，但索引空间还需要驱逐优先级更高的 b，整个请求被拒绝
        load_to_end(&mut manager, &mut ctx, &mut staging, c);
        tick(&mut manager, &mut ctx, &mut staging);

        assert_eq!(manager.mesh_state(a), ResourceState::Loaded);
        assert_eq!(manager.mesh_state(b), ResourceState::Loaded);
        assert_eq!(manager.mesh_state(c), ResourceState::UploadingToGpu);
        assert!(!manager.mesh(c).unwrap().gpu().unwrap().submeshes[0].allocated);
        assert!(manager.vertex_buffer().free_slots().is_empty());
        assert!(manager.index_buffer().free_slots().is_empty());
        assert_eq!(manager.stats().resident_meshes, 2);
    }

    #[test]
    fn request_evicts_several_residents_when_needed() {
        let source = Arc::new(MemoryAssetSource::new());
        source.insert_mesh("a.glb", MemoryAssetSource::mesh(&[(2, 3)]));
        source.insert_mesh("b.glb", MemoryAssetSource::mesh(&[(2, 3)]));
        source.insert_mesh("c.glb", MemoryAssetSource::mesh(&[(4, 6)]));
        let (mut manager, mut ctx, mut staging) = headless_manager(source, 4, 6, 4096);
        let a = manager.create_mesh_resource(mesh_desc("a.glb", 1));
        let b = manager.create_mesh_resource(mesh_desc("b.glb", 2));
        let c = manager.create_mesh_resource(mesh_desc("c.glb", 5));
        load_to_end(&mut manager, &mut ctx, &mut staging, a);
        load_to_end(&mut manager, &mut ctx, &mut staging, b);

        load_to_end(&mut manager, &mut ctx, &mut staging, c);

        assert_eq!(manager.mesh_state(c), ResourceState::Loaded);
        assert_eq!(manager.mesh_state(a), ResourceState::Unloaded);
        assert_eq!(manager.mesh_state(b), ResourceState::Unloaded);
        assert_eq!(manager.stats().resident_meshes, 1);
    }

    #[test]
    fn repeated_priority_changes_keep_residency_queue_bounded() {
        let source = Arc::new(MemoryAssetSource::new());
        source.insert_mesh("a.glb", MemoryAssetSource::mesh(&[(2, 3)]));
        source.insert_mesh("c.glb", MemoryAssetSource::mesh(&[(2, 3)]));
        let (mut manager, mut ctx, mut staging) = headless_manager(source, 2, 3, 4096);
        let a = manager.create_mesh_resource(mesh_desc("a.glb", 1));
        let c = manager.create_mesh_resource(mesh_desc("c.glb", 50));
        load_to_end(&mut manager, &mut ctx, &mut staging, a);

        for i in 0..100 {
            assert!(manager.set_mesh_priority(a, 10 + i));
            assert!(manager.residency.len() <= 2 * manager.meshes.len());
        }

        // 清理后仍然使用 a 最新的优先级
        load_to_end(&mut manager, &mut ctx, &mut staging, c);
        assert_eq!(manager.mesh_state(a), ResourceState::Loaded);
        assert_eq!(manager.mesh_state(c), ResourceState::UploadingToGpu);

        assert!(manager.set_mesh_priority(a, 1));
        tick(&mut manager, &mut ctx, &mut staging);
        tick(&mut manager, &mut ctx, &mut staging);
        assert_eq!(manager.mesh_state(c), ResourceState::Loaded);
        assert_eq!(manager.mesh_state(a), ResourceState::Unloaded);
    }

    #[test]
    fn mesh_in_flight_is_not_unloaded() {
        let source = Arc::new(MemoryAssetSource::new());
        source.insert_mesh("a.glb", MemoryAssetSource::mesh(&[(2, 3)]));
        let (mut manager, mut ctx, mut staging) = headless_manager(source, 4, 6, 4096);
        let a = manager.create_mesh_resource(mesh_desc("a.glb", 1));

        assert!(manager.load_mesh_resource(a));
        assert_eq!(manager.mesh_state(a), ResourceState::ScheduledToLoad);
        assert!(!manager.unload_mesh_resource(a));
        assert_eq!(manager.mesh_state(a), ResourceState::ScheduledToLoad);

        tick(&mut manager, &mut ctx, &mut staging);
        tick(&mut manager, &mut ctx, &mut staging);
        assert_eq!(manager.mesh_state(a), ResourceState::Loaded);
        assert!(manager.unload_mesh_resource(a));
    }

    #[test]
    fn stale_residency_entries_are_skipped() {
        let source = Arc::new(MemoryAssetSource::new());
        source.insert_mesh("a.glb", MemoryAssetSource::mesh(&[(2, 3)]));
        source.insert_mesh("b.glb", MemoryAssetSource::mesh(&[(2, 3)]));
        source.insert_mesh("c.glb", MemoryAssetSource::mesh(&[(2, 3)]));
        let (mut manager, mut ctx, mut staging) = headless_manager(source, 4, 6, 4096);
        let a = manager.create_mesh_resource(mesh_desc("a.glb", 1));
        let b = manager.create_mesh_resource(mesh_desc("b.glb", 2));
        let c = manager.create_mesh_resource(mesh_desc("c.glb", 5));
        load_to_end(&mut manager, &mut ctx, &mut staging, a);
        load_to_end(&mut manager, &mut ctx, &mut staging, b);

        // a 的优先级提高后，旧的驻留条目过期，b 成为最先被驱逐的 mesh
        assert!(manager.set_mesh_priority(a, 8));
        load_to_end(&mut manager, &mut ctx, &mut staging, c);

        assert_eq!(manager.mesh_state(c), ResourceState::Loaded);
        assert_eq!(manager.mesh_state(b), ResourceState::Unloaded);
        assert_eq!(manager.mesh_state(a), ResourceState::Loaded);
    }

    #[test]
    fn oversized_request_is_refused_without_eviction() {
        let source = Arc::new(MemoryAssetSource::new());
        source.insert_mesh("a.glb", MemoryAssetSource::mesh(&[(2, 3)]));
        source.insert_mesh("huge.glb", MemoryAssetSource::mesh(&[(5, 3)]));
        let (mut manager, mut ctx, mut staging) = headless_manager(source, 4, 6, 4096);
        let a = manager.create_mesh_resource(mesh_desc("a.glb", 0));
        let huge = manager.create_mesh_resource(mesh_desc("huge.glb", 9));
        load_to_end(&mut manager, &mut ctx, &mut staging, a);
        load_to_end(&mut manager, &mut ctx, &mut staging, huge);

        assert_eq!(manager.mesh_state(a), ResourceState::Loaded);
        assert_eq!(manager.mesh_state(huge), ResourceState::UploadingToGpu);
        assert_eq!(manager.stats().vertex_used, 2);
    }

    #[test]
    fn unloading_image_destroys_gpu_image() {
        let source = Arc::new(MemoryAssetSource::new());
        source.insert_image("a.png", MemoryAssetSource::gradient_image(4, 4, 2));
        let (mut manager, mut ctx, mut staging) = headless_manager(source, 4, 4, 4096);
        let image = manager.create_image_resource(ImageResourceDesc::new("a", "a.png"));

        assert!(manager.unload_image_resource(&mut ctx, image));
        assert_eq!(manager.image_state(image), ResourceState::Unloaded);

        manager.load_image_resource(image);
        tick(&mut manager, &mut ctx, &mut staging);
        tick(&mut manager, &mut ctx, &mut staging);
        assert_eq!(manager.image_state(image), ResourceState::Loaded);
        assert_eq!(ctx.live_image_count(), 1);

        assert!(manager.unload_image_resource(&mut ctx, image));
        assert_eq!(manager.image_state(image), ResourceState::Unloaded);
        assert!(manager.image(image).unwrap().gpu().is_none());
        assert_eq!(ctx.live_image_count(), 0);
        assert!(manager.load_image_resource(image));
    }
}

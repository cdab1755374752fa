use std::{cmp::Ordering, collections::BinaryHeap};

use crate::{
    handle::{AssetImageHandle, AssetMeshHandle},
    priority::UploadPriority,
};

/// 一个上传单元的具体内容
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadJob {
    ImageMip {
        image: AssetImageHandle,
        mip_level: u32,
    },
    MeshSubunit {
        mesh: AssetMeshHandle,
        submesh_index: u32,
        mesh_info_index: u32,
        /// 在 `GpuMesh::submeshes` 中的下标
        gpu_submesh_index: u32,
    },
}

/// 上传队列中的条目，跨帧保留已上传的字节数，从而可以断点续传
#[derive(Debug, Clone)]
pub struct UploadEntry {
    pub priority: UploadPriority,
    /// 已经拷贝的字节数
    pub uploaded_size: u64,
    pub job: UploadJob,
    /// 入队顺序，优先级相同时先入队的先上传
    sequence: u64,
}

impl PartialEq for UploadEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for UploadEntry {}

impl Ord for UploadEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for UploadEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 按组合优先级排序的最大堆
#[derive(Default)]
pub struct UploadQueue {
    heap: BinaryHeap<UploadEntry>,
    next_sequence: u64,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, priority: UploadPriority, job: UploadJob) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(UploadEntry {
            priority,
            uploaded_size: 0,
            job,
            sequence,
        });
    }

    /// 取出优先级最高的条目
    #[inline]
    pub fn pop(&mut self) -> Option<UploadEntry> {
        self.heap.pop()
    }

    /// 把尚未完成的条目放回队列，保留其入队顺序与进度
    #[inline]
    pub fn requeue(&mut self, entry: UploadEntry) {
        self.heap.push(entry);
    }

    #[inline]
    pub fn peek(&self) -> Option<&UploadEntry> {
        self.heap.peek()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// 无序遍历
    pub fn iter(&self) -> impl Iterator<Item = &UploadEntry> {
        self.heap.iter()
    }

    /// 所有等待中的条目 wait + 1
    pub fn age_waiting(&mut self) {
        self.update_all(|entry| entry.priority.wait = entry.priority.wait.saturating_add(1));
    }

    /// 修改所有条目后重建堆
    pub fn update_all(&mut self, f: impl FnMut(&mut UploadEntry)) {
        let mut entries = std::mem::take(&mut self.heap).into_vec();
        entries.iter_mut().for_each(f);
        self.heap = BinaryHeap::from(entries);
    }
}

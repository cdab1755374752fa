use std::path::PathBuf;

use glam::Vec3;

use crate::handle::ResourceState;

/// 上传到 GPU 的顶点格式
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub tangent: [f32; 4],
}

impl Vertex {
    pub const SIZE: u32 = size_of::<Self>() as u32;
}

pub const INDEX_SIZE: u32 = size_of::<u32>() as u32;

/// 轴对齐包围盒
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// 不包含任何点的包围盒，与任意包围盒合并后得到对方
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(f32::MIN),
        }
    }

    pub fn from_vertices(vertices: &[Vertex]) -> Self {
        vertices.iter().fold(Self::empty(), |aabb, vertex| {
            let p = Vec3::from(vertex.position);
            Self {
                min: aabb.min.min(p),
                max: aabb.max.max(p),
            }
        })
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }
}

/// 最小的上传单元：一段顶点和对应的索引
#[derive(Debug, Clone)]
pub struct MeshInfoGeometry {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub aabb: Aabb,
}

impl MeshInfoGeometry {
    pub fn new(name: impl Into<String>, vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        let aabb = Aabb::from_vertices(&vertices);
        Self {
            name: name.into(),
            vertices,
            indices,
            aabb,
        }
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    #[inline]
    pub fn vertex_bytes(&self) -> u64 {
        self.vertices.len() as u64 * Vertex::SIZE as u64
    }

    #[inline]
    pub fn index_bytes(&self) -> u64 {
        self.indices.len() as u64 * INDEX_SIZE as u64
    }

    /// 上传完成后释放 CPU 端数据
    pub fn release(&mut self) {
        self.vertices = Vec::new();
        self.indices = Vec::new();
    }
}

#[derive(Debug, Clone)]
pub struct SubmeshGeometry {
    pub name: String,
    pub mesh_infos: Vec<MeshInfoGeometry>,
}

/// 加载到内存中的 mesh 数据
#[derive(Debug, Clone)]
pub struct MeshGeometry {
    pub submeshes: Vec<SubmeshGeometry>,
    pub aabb: Aabb,
}

impl MeshGeometry {
    pub fn new(submeshes: Vec<SubmeshGeometry>) -> Self {
        let aabb = submeshes
            .iter()
            .flat_map(|submesh| submesh.mesh_infos.iter())
            .fold(Aabb::empty(), |aabb, info| aabb.union(&info.aabb));
        Self { submeshes, aabb }
    }

    /// 所有 submesh 下 mesh info 的总数，也就是需要上传的单元数
    pub fn mesh_info_count(&self) -> u32 {
        self.submeshes.iter().map(|submesh| submesh.mesh_infos.len() as u32).sum()
    }

    pub fn mesh_info(&self, submesh_index: u32, mesh_info_index: u32) -> Option<&MeshInfoGeometry> {
        self.submeshes.get(submesh_index as usize)?.mesh_infos.get(mesh_info_index as usize)
    }

    pub fn mesh_info_mut(&mut self, submesh_index: u32, mesh_info_index: u32) -> Option<&mut MeshInfoGeometry> {
        self.submeshes.get_mut(submesh_index as usize)?.mesh_infos.get_mut(mesh_info_index as usize)
    }
}

/// 一个 mesh info 在共享的顶点 / 索引 buffer 中的位置与上传进度
#[derive(Debug, Clone)]
pub struct GpuSubmesh {
    pub submesh_index: u32,
    pub mesh_info_index: u32,
    pub state: ResourceState,

    /// 是否已经在顶点 / 索引 buffer 中分配了区间
    pub allocated: bool,
    /// 顶点 buffer 中的起始元素下标
    pub vertex_start: u32,
    /// 索引 buffer 中的起始元素下标
    pub index_start: u32,
    pub vertex_count: u32,
    pub index_count: u32,

    pub uploaded_vertex_count: u32,
    pub uploaded_index_count: u32,

    pub aabb: Aabb,
}

impl GpuSubmesh {
    pub(crate) fn new(submesh_index: u32, mesh_info_index: u32, info: &MeshInfoGeometry) -> Self {
        Self {
            submesh_index,
            mesh_info_index,
            state: ResourceState::MemoryLoaded,
            allocated: false,
            vertex_start: 0,
            index_start: 0,
            vertex_count: info.vertex_count(),
            index_count: info.index_count(),
            uploaded_vertex_count: 0,
            uploaded_index_count: 0,
            aabb: info.aabb,
        }
    }
}

/// mesh 在 GPU 上的数据
#[derive(Debug, Clone)]
pub struct GpuMesh {
    pub submeshes: Vec<GpuSubmesh>,
    pub submesh_count: u32,
    pub uploaded_submesh_count: u32,
    pub aabb: Aabb,
}

impl GpuMesh {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.uploaded_submesh_count >= self.submesh_count
    }
}

/// 创建 mesh 资源所需的描述
#[derive(Debug, Clone, Default)]
pub struct MeshResourceDesc {
    pub name: String,
    /// 离线处理后的 mesh 文件（glb / gltf / obj）
    pub mesh_path: PathBuf,
    pub asset_hash: Option<String>,
    /// 导入前的原始文件，仅用于追溯
    pub source_file: Option<PathBuf>,
    pub priority: u32,
}

pub struct MeshResource {
    pub(crate) desc: MeshResourceDesc,
    pub(crate) state: ResourceState,
    pub(crate) priority: u32,

    pub(crate) geometry: Option<MeshGeometry>,
    pub(crate) gpu: Option<GpuMesh>,

    /// 每次进入 Loaded 时递增，用于识别驻留队列中过期的条目
    pub(crate) residency_epoch: u64,
}

// new & init
impl MeshResource {
    pub(crate) fn new(desc: MeshResourceDesc) -> Self {
        Self {
            priority: desc.priority,
            desc,
            state: ResourceState::Unloaded,
            geometry: None,
            gpu: None,
            residency_epoch: 0,
        }
    }
}

// getters
impl MeshResource {
    #[inline]
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    #[inline]
    pub fn desc(&self) -> &MeshResourceDesc {
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
    pub fn geometry(&self) -> Option<&MeshGeometry> {
        self.geometry.as_ref()
    }

    #[inline]
    pub fn gpu(&self) -> Option<&GpuMesh> {
        self.gpu.as_ref()
    }
}

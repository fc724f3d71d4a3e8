//! 后端接口使用的描述结构

use bitflags::bitflags;

use crate::{
    pipelines::{binding_layout::StaticSamplerDesc, shader::ShaderBinary},
    resources::handles::{BindingLayoutHandle, BufferHandle, DescriptorHeapHandle, TextureHandle},
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const VERTEX = 1 << 4;
        const INDEX = 1 << 5;
        /// 加速结构的存储
        const ACCELERATION_STRUCTURE_STORAGE = 1 << 6;
        /// 作为加速结构构建的输入（顶点、索引、instance）
        const ACCELERATION_STRUCTURE_INPUT = 1 << 7;
        const SHADER_BINDING_TABLE = 1 << 8;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AsBuildFlags: u32 {
        const ALLOW_UPDATE = 1 << 0;
        const ALLOW_COMPACTION = 1 << 1;
        const PREFER_FAST_TRACE = 1 << 2;
        const PREFER_FAST_BUILD = 1 << 3;
    }
}

/// 内存的位置，决定了 CPU 能否直接访问
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// 只有 GPU 可以访问，只能通过 UploadStager 写入
    DeviceLocal,
    /// CPU 可写
    Upload,
    /// CPU 可读
    Readback,
}
impl MemoryKind {
    #[inline]
    pub fn is_host_visible(self) -> bool {
        !matches!(self, Self::DeviceLocal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8Unorm,
    Rgba8Unorm,
    Bgra8Unorm,
    R32Float,
    Rgba16Float,
    Rgba32Float,
}
impl TextureFormat {
    /// 每个 texel 的字节数
    #[inline]
    pub fn texel_size(self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::Rgba8Unorm | Self::Bgra8Unorm | Self::R32Float => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: BufferUsage,
    pub memory: MemoryKind,
    /// 起始地址的最小对齐，例如 shader table 需要按照 base alignment 对齐
    pub alignment: Option<u64>,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub label: String,
}

/// shader binding table 相关的设备属性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderTableProperties {
    pub handle_size: u32,
    pub handle_alignment: u32,
    pub base_alignment: u32,
    pub max_recursion_depth: u32,
}

#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    pub adapter_name: String,
    pub ray_tracing: bool,
    pub shader_table: ShaderTableProperties,
    /// 绑定布局中 root data（push constant）的上限
    pub max_push_constant_size: u32,
    /// 加速结构 scratch buffer 的地址对齐
    pub scratch_alignment: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    /// 专用于上传数据的队列
    Upload,
}

/// 写入描述符表某个 slot 的 view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorView {
    /// UAV
    StorageTexture(TextureHandle),
    /// SRV
    SampledTexture(TextureHandle),
    StorageBuffer {
        buffer: BufferHandle,
        offset: u64,
        range: u64,
    },
    UniformBuffer {
        buffer: BufferHandle,
        offset: u64,
        range: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeapInfo {
    pub heap: DescriptorHeapHandle,
    pub cpu_start: u64,
    pub gpu_start: u64,
    pub increment: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AsKind {
    BottomLevel,
    TopLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32x3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    U16,
    U32,
}
impl IndexFormat {
    #[inline]
    pub fn index_size(self) -> u64 {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

/// BLAS 中的一个三角形 geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleGeometry {
    pub vertex_address: u64,
    pub vertex_count: u32,
    pub vertex_stride: u64,
    pub vertex_format: VertexFormat,
    pub index_address: u64,
    pub index_count: u32,
    pub index_format: IndexFormat,
    pub opaque: bool,
}
impl TriangleGeometry {
    #[inline]
    pub fn primitive_count(&self) -> u32 {
        self.index_count / 3
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AsGeometry {
    Triangles(Vec<TriangleGeometry>),
    /// instance 数组位于 address，每个元素 64 字节
    Instances { address: u64, count: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AsBuildDesc {
    pub flags: AsBuildFlags,
    pub geometry: AsGeometry,
}
impl AsBuildDesc {
    #[inline]
    pub fn kind(&self) -> AsKind {
        match self.geometry {
            AsGeometry::Triangles(_) => AsKind::BottomLevel,
            AsGeometry::Instances { .. } => AsKind::TopLevel,
        }
    }

    /// BLAS 为三角形的总数，TLAS 为 instance 的数量
    pub fn primitive_count(&self) -> u32 {
        match &self.geometry {
            AsGeometry::Triangles(triangles) => triangles.iter().map(TriangleGeometry::primitive_count).sum(),
            AsGeometry::Instances { count, .. } => *count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AsBuildMode {
    Build,
    /// refit，源和目标可以是同一个加速结构
    Update,
}

/// 构建加速结构之前需要知道的尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AsPrebuildInfo {
    pub result_size: u64,
    pub build_scratch_size: u64,
    pub update_scratch_size: u64,
}

#[derive(Debug, Clone)]
pub struct BindingLayoutDesc {
    pub label: String,
    /// 是否绑定描述符堆，table 类型的 binding 需要
    pub heap: Option<DescriptorHeapHandle>,
    pub push_constant_size: u32,
    pub static_samplers: Vec<StaticSamplerDesc>,
}

/// 一个 hit group，名称是 shader 中的 entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitGroupDesc {
    pub closest_hit: Option<String>,
    pub any_hit: Option<String>,
    pub intersection: Option<String>,
}

/// shader group 的顺序：raygen，所有的 miss，所有的 hit group
#[derive(Debug, Clone)]
pub struct RtPipelineDesc<'a> {
    pub label: &'a str,
    pub layout: BindingLayoutHandle,
    pub binary: &'a ShaderBinary,
    pub raygen: &'a str,
    pub miss: &'a [String],
    pub hit_groups: &'a [HitGroupDesc],
    pub max_recursion_depth: u32,
}
impl RtPipelineDesc<'_> {
    #[inline]
    pub fn group_count(&self) -> u32 {
        1 + self.miss.len() as u32 + self.hit_groups.len() as u32
    }
}

/// 只有一个 compute shader 的管线
#[derive(Debug, Clone)]
pub struct ComputePipelineDesc<'a> {
    pub label: &'a str,
    pub layout: BindingLayoutHandle,
    pub binary: &'a ShaderBinary,
    pub entry_point: &'a str,
}

/// shader table 中的一个区域，等价于 `vk::StridedDeviceAddressRegionKHR`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StridedRegion {
    pub address: u64,
    pub stride: u64,
    pub size: u64,
}

//! 后端无关的类型到 vulkan 类型的转换

use ash::vk;

use crate::{
    backend::types::{
        AsBuildFlags, AsBuildMode, AsKind, BufferUsage, IndexFormat, MemoryKind, TextureFormat, TextureUsage,
        VertexFormat,
    },
    commands::gfx_command::{BarrierScope, TextureState},
    pipelines::binding_layout::{SamplerAddressMode, SamplerFilter},
};

/// 光追管线以及后处理的 compute 管线中所有可能访问资源的 stage
pub const SHADER_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::COMPUTE.as_raw()
        | vk::ShaderStageFlags::RAYGEN_KHR.as_raw()
        | vk::ShaderStageFlags::MISS_KHR.as_raw()
        | vk::ShaderStageFlags::CLOSEST_HIT_KHR.as_raw()
        | vk::ShaderStageFlags::ANY_HIT_KHR.as_raw()
        | vk::ShaderStageFlags::INTERSECTION_KHR.as_raw()
        | vk::ShaderStageFlags::CALLABLE_KHR.as_raw(),
);

pub fn format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
    }
}

pub fn vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
    }
}

pub fn index_type(format: IndexFormat) -> vk::IndexType {
    match format {
        IndexFormat::U16 => vk::IndexType::UINT16,
        IndexFormat::U32 => vk::IndexType::UINT32,
    }
}

/// 所有 buffer 都带有 SHADER_DEVICE_ADDRESS，shader 通过地址访问 buffer
pub fn buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    let table = [
        (BufferUsage::TRANSFER_SRC, vk::BufferUsageFlags::TRANSFER_SRC),
        (BufferUsage::TRANSFER_DST, vk::BufferUsageFlags::TRANSFER_DST),
        (BufferUsage::UNIFORM, vk::BufferUsageFlags::UNIFORM_BUFFER),
        (BufferUsage::STORAGE, vk::BufferUsageFlags::STORAGE_BUFFER),
        (BufferUsage::VERTEX, vk::BufferUsageFlags::VERTEX_BUFFER),
        (BufferUsage::INDEX, vk::BufferUsageFlags::INDEX_BUFFER),
        (BufferUsage::ACCELERATION_STRUCTURE_STORAGE, vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR),
        (
            BufferUsage::ACCELERATION_STRUCTURE_INPUT,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
        ),
        (BufferUsage::SHADER_BINDING_TABLE, vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR),
    ];
    for (usage_bit, vk_bit) in table {
        if usage.contains(usage_bit) {
            flags |= vk_bit;
        }
    }
    flags
}

pub fn texture_usage(usage: TextureUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    let table = [
        (TextureUsage::TRANSFER_SRC, vk::ImageUsageFlags::TRANSFER_SRC),
        (TextureUsage::TRANSFER_DST, vk::ImageUsageFlags::TRANSFER_DST),
        (TextureUsage::SAMPLED, vk::ImageUsageFlags::SAMPLED),
        (TextureUsage::STORAGE, vk::ImageUsageFlags::STORAGE),
    ];
    for (usage_bit, vk_bit) in table {
        if usage.contains(usage_bit) {
            flags |= vk_bit;
        }
    }
    flags
}

/// CPU 可见的内存使用 HOST_ACCESS_RANDOM，读写都可以
pub fn allocation_info(memory: MemoryKind) -> vk_mem::AllocationCreateInfo {
    match memory {
        MemoryKind::DeviceLocal => vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        },
        MemoryKind::Upload => vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferHost,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
            ..Default::default()
        },
        MemoryKind::Readback => vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferHost,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
            ..Default::default()
        },
    }
}

pub fn accel_type(kind: AsKind) -> vk::AccelerationStructureTypeKHR {
    match kind {
        AsKind::BottomLevel => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
        AsKind::TopLevel => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
    }
}

pub fn build_flags(flags: AsBuildFlags) -> vk::BuildAccelerationStructureFlagsKHR {
    let mut vk_flags = vk::BuildAccelerationStructureFlagsKHR::empty();
    let table = [
        (AsBuildFlags::ALLOW_UPDATE, vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE),
        (AsBuildFlags::ALLOW_COMPACTION, vk::BuildAccelerationStructureFlagsKHR::ALLOW_COMPACTION),
        (AsBuildFlags::PREFER_FAST_TRACE, vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE),
        (AsBuildFlags::PREFER_FAST_BUILD, vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD),
    ];
    for (flag, vk_flag) in table {
        if flags.contains(flag) {
            vk_flags |= vk_flag;
        }
    }
    vk_flags
}

pub fn build_mode(mode: AsBuildMode) -> vk::BuildAccelerationStructureModeKHR {
    match mode {
        AsBuildMode::Build => vk::BuildAccelerationStructureModeKHR::BUILD,
        AsBuildMode::Update => vk::BuildAccelerationStructureModeKHR::UPDATE,
    }
}

/// texture 状态对应的 (layout, stage, access)
pub fn texture_state(state: TextureState) -> (vk::ImageLayout, vk::PipelineStageFlags2, vk::AccessFlags2) {
    match state {
        TextureState::Undefined => {
            (vk::ImageLayout::UNDEFINED, vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE)
        }
        TextureState::CopySrc => (
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_READ,
        ),
        TextureState::CopyDst => (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
        ),
        TextureState::ShaderRead => (
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR | vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_SAMPLED_READ,
        ),
        TextureState::Storage => (
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR | vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
        ),
        // 无窗口，没有 swapchain，present 之后的 texture 只会被读回
        TextureState::Present => (
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ,
        ),
    }
}

/// (src_stage, src_access, dst_stage, dst_access)
pub fn barrier_scope(
    scope: BarrierScope,
) -> (vk::PipelineStageFlags2, vk::AccessFlags2, vk::PipelineStageFlags2, vk::AccessFlags2) {
    match scope {
        BarrierScope::AccelerationStructure => (
            vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
            vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
            vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
                | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
        ),
        // 队列上之前的所有命令都在第一个同步范围内，包括更早的提交
        BarrierScope::AccelerationStructureRefit => (
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR
                | vk::PipelineStageFlags2::COMPUTE_SHADER
                | vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
            vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
            vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
            vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
        ),
        BarrierScope::Full => (
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_WRITE,
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
        ),
    }
}

pub fn sampler_info(
    filter: SamplerFilter,
    address_mode: SamplerAddressMode,
    max_anisotropy: u32,
) -> vk::SamplerCreateInfo<'static> {
    let (filter, mipmap) = match filter {
        SamplerFilter::Nearest => (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST),
        SamplerFilter::Linear => (vk::Filter::LINEAR, vk::SamplerMipmapMode::LINEAR),
    };
    let address = match address_mode {
        SamplerAddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        SamplerAddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        SamplerAddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
    };

    vk::SamplerCreateInfo::default()
        .mag_filter(filter)
        .min_filter(filter)
        .mipmap_mode(mipmap)
        .address_mode_u(address)
        .address_mode_v(address)
        .address_mode_w(address)
        .anisotropy_enable(max_anisotropy > 0)
        .max_anisotropy(max_anisotropy.max(1) as f32)
        .max_lod(vk::LOD_CLAMP_NONE)
}

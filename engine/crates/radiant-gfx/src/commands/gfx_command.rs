//! 与后端无关的命令
//!
//! CommandRecorder 录制的是 [`GfxCommand`]，在提交时由后端编码为真正的设备命令

use crate::{
    backend::types::{AsBuildDesc, AsBuildMode, StridedRegion},
    resources::handles::{AccelHandle, BindingLayoutHandle, BufferHandle, DescriptorHeapHandle, PipelineHandle, TextureHandle},
};

/// texture 的使用状态，barrier 在两个状态之间转换
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureState {
    Undefined,
    CopySrc,
    CopyDst,
    /// shader 只读
    ShaderRead,
    /// shader 读写，UAV
    Storage,
    Present,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierScope {
    /// 构建写入加速结构 -> 之后的构建或者 trace 读取
    AccelerationStructure,
    /// 之前提交的 trace 以及构建读取加速结构 -> 原地 refit 写入
    AccelerationStructureRefit,
    /// 所有内存的读写
    Full,
}

/// 写入某个 named binding slot 的值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingValue {
    /// 描述符表中的 gpu handle
    Table(u64),
    /// buffer 或者加速结构的设备地址
    Direct(u64),
    /// 直接写入的 32 位常量
    Constants(Vec<u32>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GfxCommand {
    CopyBuffer {
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    },
    /// staging buffer 中每行的起始位置是 row_pitch 的整数倍
    CopyBufferToTexture {
        src: BufferHandle,
        src_offset: u64,
        row_pitch: u32,
        dst: TextureHandle,
        width: u32,
        height: u32,
    },
    CopyTexture {
        src: TextureHandle,
        dst: TextureHandle,
        width: u32,
        height: u32,
    },
    TextureBarrier {
        texture: TextureHandle,
        from: TextureState,
        to: TextureState,
    },
    MemoryBarrier(BarrierScope),
    BuildAccelerationStructure {
        desc: AsBuildDesc,
        mode: AsBuildMode,
        dst: AccelHandle,
        /// update 时的源，可以和 dst 相同
        src: Option<AccelHandle>,
        scratch_address: u64,
    },
    BindPipeline(PipelineHandle),
    BindDescriptorHeap {
        heap: DescriptorHeapHandle,
        layout: BindingLayoutHandle,
    },
    SetBinding {
        layout: BindingLayoutHandle,
        offset: u32,
        value: BindingValue,
    },
    TraceRays {
        raygen: StridedRegion,
        miss: StridedRegion,
        hit: StridedRegion,
        callable: StridedRegion,
        width: u32,
        height: u32,
        depth: u32,
    },
    /// 以 thread group 为单位
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    BeginLabel(String),
    EndLabel,
}

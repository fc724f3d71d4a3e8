//! 核心层与设备之间唯一的接口
//!
//! - [`vulkan::VulkanBackend`]：基于 ash + vk-mem 的无窗口实现
//! - [`mock::MockBackend`]：确定性的内存模拟设备，测试和无 GPU 环境使用
//!
//! 所有方法都是 `&self`，后端内部使用 RefCell 管理可变状态，整个 GFX 层只在一个线程中使用

pub mod mock;
pub mod types;
pub mod vulkan;

use crate::{
    backend::types::{
        AsBuildDesc, AsKind, AsPrebuildInfo, BindingLayoutDesc, BufferDesc, ComputePipelineDesc, DescriptorHeapInfo, DescriptorView,
        DeviceCapabilities, QueueKind, RtPipelineDesc, TextureDesc,
    },
    commands::gfx_command::GfxCommand,
    error::GfxResult,
    resources::handles::{
        AccelHandle, BindingLayoutHandle, BufferHandle, CommandStorageHandle, DescriptorHeapHandle, PipelineHandle,
        QueueHandle, TextureHandle, TimelineHandle,
    },
};

/// 一次提交
///
/// 先等待所有的 waits，再执行命令，最后 signal
pub struct SubmitBatch<'a> {
    pub commands: Option<(CommandStorageHandle, &'a [GfxCommand])>,
    pub waits: Vec<(TimelineHandle, u64)>,
    pub signal: Option<(TimelineHandle, u64)>,
}

pub trait GfxBackend {
    /// 后端的名称，用于日志
    fn name(&self) -> &str;

    fn capabilities(&self) -> &DeviceCapabilities;

    /// 等待设备上所有的工作完成
    fn wait_idle(&self) -> GfxResult<()>;

    // buffer
    fn create_buffer(&self, desc: &BufferDesc) -> GfxResult<BufferHandle>;
    fn destroy_buffer(&self, buffer: BufferHandle);
    /// 只有 CPU 可见的内存才能写入
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GfxResult<()>;
    /// 只有 CPU 可见的内存才能读取
    fn read_buffer(&self, buffer: BufferHandle, offset: u64, out: &mut [u8]) -> GfxResult<()>;
    fn buffer_device_address(&self, buffer: BufferHandle) -> u64;

    // texture
    fn create_texture(&self, desc: &TextureDesc) -> GfxResult<TextureHandle>;
    fn destroy_texture(&self, texture: TextureHandle);

    // descriptor
    fn create_descriptor_heap(&self, capacity: u32, label: &str) -> GfxResult<DescriptorHeapInfo>;
    fn write_descriptor(&self, heap: DescriptorHeapHandle, index: u32, view: &DescriptorView);
    fn destroy_descriptor_heap(&self, heap: DescriptorHeapHandle);

    // queue & timeline
    fn create_queue(&self, kind: QueueKind, label: &str) -> GfxResult<QueueHandle>;
    fn create_timeline(&self, label: &str) -> GfxResult<TimelineHandle>;
    fn timeline_completed_value(&self, timeline: TimelineHandle) -> GfxResult<u64>;
    /// 阻塞直到 timeline 的值 >= value
    fn wait_timeline(&self, timeline: TimelineHandle, value: u64) -> GfxResult<()>;
    fn destroy_timeline(&self, timeline: TimelineHandle);

    // command
    fn create_command_storage(&self, queue: QueueHandle, label: &str) -> GfxResult<CommandStorageHandle>;
    /// 调用者需要保证 storage 中的命令已经执行完成
    fn reset_command_storage(&self, storage: CommandStorageHandle) -> GfxResult<()>;
    fn destroy_command_storage(&self, storage: CommandStorageHandle);
    fn submit(&self, queue: QueueHandle, batch: SubmitBatch<'_>) -> GfxResult<()>;

    // acceleration structure
    fn acceleration_structure_sizes(&self, desc: &AsBuildDesc) -> AsPrebuildInfo;
    fn create_acceleration_structure(
        &self,
        kind: AsKind,
        buffer: BufferHandle,
        size: u64,
        label: &str,
    ) -> GfxResult<AccelHandle>;
    fn acceleration_structure_address(&self, accel: AccelHandle) -> u64;
    fn destroy_acceleration_structure(&self, accel: AccelHandle);

    // pipeline
    fn create_binding_layout(&self, desc: &BindingLayoutDesc) -> GfxResult<BindingLayoutHandle>;
    fn destroy_binding_layout(&self, layout: BindingLayoutHandle);
    fn create_rt_pipeline(&self, desc: &RtPipelineDesc<'_>) -> GfxResult<PipelineHandle>;
    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc<'_>) -> GfxResult<PipelineHandle>;
    /// 所有 shader group 的 identifier，依次排列，每个 `handle_size` 字节
    fn shader_group_handles(&self, pipeline: PipelineHandle, group_count: u32) -> GfxResult<Vec<u8>>;
    fn destroy_pipeline(&self, pipeline: PipelineHandle);
}

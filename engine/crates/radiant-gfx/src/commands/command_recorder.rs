use crate::{
    backend::types::{AsBuildDesc, AsBuildMode},
    commands::{
        fence::Fence,
        gfx_command::{BarrierScope, BindingValue, GfxCommand, TextureState},
    },
    error::GfxResult,
    foundation::device::DeviceHandle,
    pipelines::shader_table::ShaderTableRegions,
    resources::{
        buffer::GpuBuffer,
        handles::{AccelHandle, BindingLayoutHandle, CommandStorageHandle, DescriptorHeapHandle, PipelineHandle, QueueHandle},
        texture::GpuTexture,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Recording,
    Closed,
}

/// 可以循环使用的命令缓冲
///
/// 状态机：`Recording ⇄ Closed`。只有上一次提交的 FenceValue 完成之后才能 reset
pub struct CommandRecorder {
    storage: CommandStorageHandle,
    queue: QueueHandle,
    state: RecorderState,
    commands: Vec<GfxCommand>,
    /// 上一次提交的 FenceValue，0 表示从未提交
    retirement: u64,
    label: String,

    device: DeviceHandle,
}

// new & init
impl CommandRecorder {
    pub(crate) fn new(device: DeviceHandle, queue: QueueHandle, label: impl AsRef<str>) -> GfxResult<Self> {
        let label = label.as_ref().to_string();
        let storage = device.backend().create_command_storage(queue, &label)?;
        Ok(Self {
            storage,
            queue,
            state: RecorderState::Recording,
            commands: Vec::new(),
            retirement: 0,
            label,
            device,
        })
    }
}

// getters
impl CommandRecorder {
    #[inline]
    pub fn state(&self) -> RecorderState {
        self.state
    }
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state == RecorderState::Closed
    }
    #[inline]
    pub fn commands(&self) -> &[GfxCommand] {
        &self.commands
    }
    #[inline]
    pub fn retirement_value(&self) -> u64 {
        self.retirement
    }
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }
    #[inline]
    pub(crate) fn storage(&self) -> CommandStorageHandle {
        self.storage
    }
    #[inline]
    pub(crate) fn queue(&self) -> QueueHandle {
        self.queue
    }
}

// 状态转换
impl CommandRecorder {
    /// 等待上一次提交完成，然后回收存储，重新进入 Recording
    pub fn reset(&mut self, fence: &Fence) -> GfxResult<()> {
        if self.retirement != 0 {
            fence.wait_for(self.retirement)?;
        }
        self.device.backend().reset_command_storage(self.storage)?;
        self.commands.clear();
        self.state = RecorderState::Recording;
        Ok(())
    }

    /// 可以重复调用
    #[inline]
    pub fn close(&mut self) {
        self.state = RecorderState::Closed;
    }

    #[inline]
    pub(crate) fn set_label(&mut self, label: impl AsRef<str>) {
        self.label = label.as_ref().to_string();
    }

    #[inline]
    pub(crate) fn set_retirement(&mut self, value: u64) {
        debug_assert!(value > self.retirement);
        self.retirement = value;
    }

    fn push(&mut self, command: GfxCommand) {
        assert!(
            self.state == RecorderState::Recording,
            "recording into closed command recorder '{}'",
            self.label
        );
        self.commands.push(command);
    }
}

// 数据传输
impl CommandRecorder {
    pub fn copy_buffer(&mut self, src: &GpuBuffer, src_offset: u64, dst: &GpuBuffer, dst_offset: u64, size: u64) {
        self.push(GfxCommand::CopyBuffer {
            src: src.handle(),
            src_offset,
            dst: dst.handle(),
            dst_offset,
            size,
        });
    }

    /// staging buffer 中每行的起始位置是 row_pitch 的整数倍
    pub fn copy_buffer_to_texture(&mut self, src: &GpuBuffer, src_offset: u64, row_pitch: u32, dst: &GpuTexture) {
        self.push(GfxCommand::CopyBufferToTexture {
            src: src.handle(),
            src_offset,
            row_pitch,
            dst: dst.handle(),
            width: dst.width(),
            height: dst.height(),
        });
    }

    /// 复制两者重叠的区域
    pub fn copy_texture(&mut self, src: &GpuTexture, dst: &GpuTexture) {
        self.push(GfxCommand::CopyTexture {
            src: src.handle(),
            dst: dst.handle(),
            width: src.width().min(dst.width()),
            height: src.height().min(dst.height()),
        });
    }
}

// 同步
impl CommandRecorder {
    pub fn texture_barrier(&mut self, texture: &GpuTexture, from: TextureState, to: TextureState) {
        self.push(GfxCommand::TextureBarrier {
            texture: texture.handle(),
            from,
            to,
        });
    }

    pub fn memory_barrier(&mut self, scope: BarrierScope) {
        self.push(GfxCommand::MemoryBarrier(scope));
    }
}

// 光追
impl CommandRecorder {
    pub fn build_acceleration_structure(
        &mut self,
        desc: AsBuildDesc,
        mode: AsBuildMode,
        dst: AccelHandle,
        src: Option<AccelHandle>,
        scratch_address: u64,
    ) {
        self.push(GfxCommand::BuildAccelerationStructure {
            desc,
            mode,
            dst,
            src,
            scratch_address,
        });
    }

    pub fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.push(GfxCommand::BindPipeline(pipeline));
    }

    pub fn bind_descriptor_heap(&mut self, heap: DescriptorHeapHandle, layout: BindingLayoutHandle) {
        self.push(GfxCommand::BindDescriptorHeap { heap, layout });
    }

    pub fn set_binding(&mut self, layout: BindingLayoutHandle, offset: u32, value: BindingValue) {
        self.push(GfxCommand::SetBinding { layout, offset, value });
    }

    pub fn trace_rays(&mut self, regions: &ShaderTableRegions, width: u32, height: u32, depth: u32) {
        self.push(GfxCommand::TraceRays {
            raygen: regions.raygen,
            miss: regions.miss,
            hit: regions.hit,
            callable: regions.callable,
            width,
            height,
            depth,
        });
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.push(GfxCommand::Dispatch { x, y, z });
    }
}

// debug
impl CommandRecorder {
    pub fn begin_label(&mut self, name: impl AsRef<str>) {
        self.push(GfxCommand::BeginLabel(name.as_ref().to_string()));
    }

    pub fn end_label(&mut self) {
        self.push(GfxCommand::EndLabel);
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        self.device.backend().destroy_command_storage(self.storage);
    }
}

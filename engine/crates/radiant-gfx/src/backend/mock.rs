//! 确定性的模拟设备
//!
//! - 每次提交在 `latency` 之后完成，并且不会早于同一队列上一个提交的完成时间（队列内顺序执行）
//! - copy 命令在提交时直接作用到 CPU 侧的字节数组上，测试可以读回任意 buffer 和 texture
//! - 加速结构的尺寸是确定的，shader identifier 中编码了 pipeline 的序号
//! - 等待一个从未 signal 过的值会返回错误，而不是永远阻塞

use std::{
    cell::{Cell, RefCell},
    time::{Duration, Instant},
};

use slotmap::SlotMap;

use crate::{
    backend::{
        GfxBackend, SubmitBatch,
        types::{
            AsBuildDesc, AsBuildFlags, AsBuildMode, AsKind, AsPrebuildInfo, BindingLayoutDesc, BufferDesc,
            ComputePipelineDesc, DescriptorHeapInfo, DescriptorView, DeviceCapabilities, MemoryKind, QueueKind,
            RtPipelineDesc, ShaderTableProperties, TextureDesc, TextureFormat,
        },
    },
    basic::align::align_up,
    commands::gfx_command::{GfxCommand, TextureState},
    error::{GfxError, GfxResult},
    resources::handles::{
        AccelHandle, BindingLayoutHandle, BufferHandle, CommandStorageHandle, DescriptorHeapHandle, PipelineHandle,
        QueueHandle, TextureHandle, TimelineHandle,
    },
};

struct MockBuffer {
    data: Vec<u8>,
    memory: MemoryKind,
    address: u64,
    label: String,
}

struct MockTexture {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: TextureFormat,
    state: TextureState,
}

struct MockHeap {
    views: Vec<Option<DescriptorView>>,
}

struct MockQueue {
    label: String,
    /// 队列上最后一个提交的完成时刻
    busy_until: Instant,
}

struct MockTimeline {
    label: String,
    /// (value, 完成时刻)，value 递增
    signals: Vec<(u64, Instant)>,
}

struct MockStorage {
    queue: QueueHandle,
    resets: u32,
}

struct MockAccel {
    kind: AsKind,
    size: u64,
    address: u64,
    /// 最近一次 build 使用的 flags，还没有 build 过时为 None
    built_flags: Option<AsBuildFlags>,
    primitive_count: u32,
    builds: u32,
    updates: u32,
}

struct MockPipeline {
    serial: u64,
    group_count: u32,
}

/// 模拟设备上的一次提交，测试用来检查同步关系
#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub queue: QueueHandle,
    pub queue_label: String,
    pub commands: Vec<GfxCommand>,
    pub waits: Vec<(TimelineHandle, u64)>,
    pub signal: Option<(TimelineHandle, u64)>,
}

#[derive(Default)]
struct MockState {
    buffers: SlotMap<BufferHandle, MockBuffer>,
    textures: SlotMap<TextureHandle, MockTexture>,
    heaps: SlotMap<DescriptorHeapHandle, MockHeap>,
    queues: SlotMap<QueueHandle, MockQueue>,
    timelines: SlotMap<TimelineHandle, MockTimeline>,
    storages: SlotMap<CommandStorageHandle, MockStorage>,
    accels: SlotMap<AccelHandle, MockAccel>,
    layouts: SlotMap<BindingLayoutHandle, BindingLayoutDesc>,
    pipelines: SlotMap<PipelineHandle, MockPipeline>,

    submissions: Vec<SubmissionRecord>,

    next_address: u64,
    next_heap_offset: u64,
    next_pipeline_serial: u64,
}

pub struct MockBackend {
    caps: DeviceCapabilities,
    latency: Duration,
    state: RefCell<MockState>,
    fail_next_pipeline: Cell<bool>,
}

// new & init
impl MockBackend {
    pub const HANDLE_SIZE: u32 = 32;
    pub const DESCRIPTOR_INCREMENT: u64 = 32;
    const ADDRESS_BASE: u64 = 0x1_0000_0000;
    const ADDRESS_ALIGN: u64 = 256;

    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// 每个提交在 latency 之后才完成
    pub fn with_latency(latency: Duration) -> Self {
        let state = MockState {
            next_address: Self::ADDRESS_BASE,
            next_pipeline_serial: 1,
            ..Default::default()
        };

        Self {
            caps: DeviceCapabilities {
                adapter_name: "radiant mock device".to_string(),
                ray_tracing: true,
                shader_table: ShaderTableProperties {
                    handle_size: Self::HANDLE_SIZE,
                    handle_alignment: 32,
                    base_alignment: 64,
                    max_recursion_depth: 31,
                },
                max_push_constant_size: 128,
                scratch_alignment: 128,
            },
            latency,
            state: RefCell::new(state),
            fail_next_pipeline: Cell::new(false),
        }
    }

    /// 模拟不支持硬件光追的设备
    pub fn without_ray_tracing(mut self) -> Self {
        self.caps.ray_tracing = false;
        self
    }

    pub fn with_max_push_constant_size(mut self, size: u32) -> Self {
        self.caps.max_push_constant_size = size;
        self
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

// 测试用的检查接口
impl MockBackend {
    /// 下一次 pipeline 创建会失败
    pub fn fail_next_pipeline(&self) {
        self.fail_next_pipeline.set(true);
    }

    pub fn texture_bytes(&self, texture: TextureHandle) -> Vec<u8> {
        self.state.borrow().textures[texture].data.clone()
    }

    pub fn texture_state(&self, texture: TextureHandle) -> TextureState {
        self.state.borrow().textures[texture].state
    }

    /// 忽略内存类型，直接读取 buffer 的内容
    pub fn debug_read_buffer(&self, buffer: BufferHandle) -> Vec<u8> {
        self.state.borrow().buffers[buffer].data.clone()
    }

    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.state.borrow().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.state.borrow().submissions.len()
    }

    pub fn descriptor_at(&self, heap: DescriptorHeapHandle, index: u32) -> Option<DescriptorView> {
        self.state.borrow().heaps[heap].views[index as usize]
    }

    /// (build 次数，update 次数)
    pub fn accel_build_counts(&self, accel: AccelHandle) -> (u32, u32) {
        let state = self.state.borrow();
        let accel = &state.accels[accel];
        (accel.builds, accel.updates)
    }

    pub fn storage_reset_count(&self, storage: CommandStorageHandle) -> u32 {
        self.state.borrow().storages[storage].resets
    }

    pub fn live_buffer_count(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    pub fn live_accel_count(&self) -> usize {
        self.state.borrow().accels.len()
    }

    pub fn live_pipeline_count(&self) -> usize {
        self.state.borrow().pipelines.len()
    }

    pub fn binding_layout_desc(&self, layout: BindingLayoutHandle) -> Option<BindingLayoutDesc> {
        self.state.borrow().layouts.get(layout).cloned()
    }
}

// tools
impl MockBackend {
    /// 确定性的尺寸：与 primitive 数量线性相关
    fn prebuild_sizes(desc: &AsBuildDesc) -> AsPrebuildInfo {
        let count = desc.primitive_count() as u64;
        match desc.kind() {
            AsKind::BottomLevel => AsPrebuildInfo {
                result_size: align_up(256 + 64 * count, 256),
                build_scratch_size: 128 + 32 * count,
                update_scratch_size: 128 + 32 * count,
            },
            AsKind::TopLevel => AsPrebuildInfo {
                result_size: align_up(256 + 128 * count, 256),
                build_scratch_size: 128 + 64 * count,
                update_scratch_size: 64 + 32 * count,
            },
        }
    }

    fn alloc_address(state: &mut MockState, size: u64, alignment: Option<u64>) -> u64 {
        let align = alignment.unwrap_or(Self::ADDRESS_ALIGN).max(Self::ADDRESS_ALIGN);
        let address = align_up(state.next_address, align);
        state.next_address = address + align_up(size.max(1), Self::ADDRESS_ALIGN);
        address
    }

    /// value 在什么时刻完成；value 为 0 时没有约束
    fn signal_time(state: &MockState, timeline: TimelineHandle, value: u64) -> GfxResult<Option<Instant>> {
        if value == 0 {
            return Ok(None);
        }
        let timeline = &state.timelines[timeline];
        timeline
            .signals
            .iter()
            .find(|(signaled, _)| *signaled >= value)
            .map(|(_, ready)| Some(*ready))
            .ok_or_else(|| GfxError::WaitOnUnsignaled {
                label: timeline.label.clone(),
                value,
            })
    }

    fn check_range(label: &str, offset: u64, len: u64, size: u64) -> GfxResult<()> {
        if offset.checked_add(len).is_none_or(|end| end > size) {
            return Err(GfxError::OutOfBounds {
                label: label.to_string(),
                offset,
                len,
                size,
            });
        }
        Ok(())
    }

    fn execute(state: &mut MockState, command: &GfxCommand) -> GfxResult<()> {
        match command {
            GfxCommand::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let src_buffer = &state.buffers[*src];
                Self::check_range(&src_buffer.label, *src_offset, *size, src_buffer.data.len() as u64)?;
                let bytes = src_buffer.data[*src_offset as usize..(*src_offset + *size) as usize].to_vec();

                let dst_buffer = &mut state.buffers[*dst];
                Self::check_range(&dst_buffer.label, *dst_offset, *size, dst_buffer.data.len() as u64)?;
                dst_buffer.data[*dst_offset as usize..(*dst_offset + *size) as usize].copy_from_slice(&bytes);
            }
            GfxCommand::CopyBufferToTexture {
                src,
                src_offset,
                row_pitch,
                dst,
                width,
                height,
            } => {
                let texel_size = state.textures[*dst].format.texel_size();
                let row_bytes = (*width * texel_size) as usize;
                assert!(*row_pitch as usize >= row_bytes, "row pitch {row_pitch} is smaller than a row ({row_bytes} bytes)");

                let src_buffer = &state.buffers[*src];
                let src_len = *row_pitch as u64 * (*height as u64).saturating_sub(1) + row_bytes as u64;
                Self::check_range(&src_buffer.label, *src_offset, src_len, src_buffer.data.len() as u64)?;
                let rows = (0..*height as usize)
                    .map(|row| {
                        let start = *src_offset as usize + row * *row_pitch as usize;
                        src_buffer.data[start..start + row_bytes].to_vec()
                    })
                    .collect::<Vec<_>>();

                let texture = &mut state.textures[*dst];
                assert!(*width <= texture.width && *height <= texture.height, "copy region exceeds texture extent");
                let dst_pitch = (texture.width * texel_size) as usize;
                for (row, bytes) in rows.iter().enumerate() {
                    let start = row * dst_pitch;
                    texture.data[start..start + row_bytes].copy_from_slice(bytes);
                }
            }
            GfxCommand::CopyTexture { src, dst, width, height } => {
                let src_texture = &state.textures[*src];
                let texel_size = src_texture.format.texel_size() as usize;
                let src_pitch = src_texture.width as usize * texel_size;
                let row_bytes = (*width).min(src_texture.width) as usize * texel_size;
                let rows = (0..(*height).min(src_texture.height) as usize)
                    .map(|row| src_texture.data[row * src_pitch..row * src_pitch + row_bytes].to_vec())
                    .collect::<Vec<_>>();

                let dst_texture = &mut state.textures[*dst];
                let dst_pitch = dst_texture.width as usize * dst_texture.format.texel_size() as usize;
                let row_bytes = row_bytes.min(dst_pitch);
                for (row, bytes) in rows.iter().take(dst_texture.height as usize).enumerate() {
                    dst_texture.data[row * dst_pitch..row * dst_pitch + row_bytes].copy_from_slice(&bytes[..row_bytes]);
                }
            }
            GfxCommand::TextureBarrier { texture, from, to } => {
                let texture = &mut state.textures[*texture];
                if *from != TextureState::Undefined && *from != texture.state {
                    log::warn!("texture barrier from {:?}, but texture is in {:?}", from, texture.state);
                }
                texture.state = *to;
            }
            GfxCommand::BuildAccelerationStructure {
                desc,
                mode,
                dst,
                src,
                scratch_address: _,
            } => {
                let required = Self::prebuild_sizes(desc).result_size;
                let accel = &mut state.accels[*dst];
                if required > accel.size {
                    return Err(GfxError::creation(
                        "acceleration structure",
                        format!("{:?}", dst),
                        format!("needs {required} bytes, storage has {}", accel.size),
                    ));
                }
                match mode {
                    AsBuildMode::Build => {
                        accel.built_flags = Some(desc.flags);
                        accel.primitive_count = desc.primitive_count();
                        accel.builds += 1;
                    }
                    AsBuildMode::Update => {
                        let allow_update =
                            accel.built_flags.is_some_and(|flags| flags.contains(AsBuildFlags::ALLOW_UPDATE));
                        if !allow_update || src.is_none() {
                            return Err(GfxError::Unsupported(
                                "update of an acceleration structure built without ALLOW_UPDATE".to_string(),
                            ));
                        }
                        if accel.primitive_count != desc.primitive_count() {
                            return Err(GfxError::Unsupported(
                                "acceleration structure update with a different primitive count".to_string(),
                            ));
                        }
                        accel.updates += 1;
                    }
                }
            }
            GfxCommand::BindPipeline(pipeline) => {
                debug_assert!(state.pipelines.contains_key(*pipeline), "binding a destroyed pipeline");
            }
            GfxCommand::MemoryBarrier(_)
            | GfxCommand::BindDescriptorHeap { .. }
            | GfxCommand::SetBinding { .. }
            | GfxCommand::TraceRays { .. }
            | GfxCommand::Dispatch { .. }
            | GfxCommand::BeginLabel(_)
            | GfxCommand::EndLabel => {}
        }
        Ok(())
    }
}

impl GfxBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    fn wait_idle(&self) -> GfxResult<()> {
        let busy_until = self.state.borrow().queues.values().map(|queue| queue.busy_until).max();
        if let Some(busy_until) = busy_until {
            let now = Instant::now();
            if busy_until > now {
                std::thread::sleep(busy_until - now);
            }
        }
        Ok(())
    }

    fn create_buffer(&self, desc: &BufferDesc) -> GfxResult<BufferHandle> {
        let mut state = self.state.borrow_mut();
        let address = Self::alloc_address(&mut state, desc.size, desc.alignment);
        Ok(state.buffers.insert(MockBuffer {
            data: vec![0; desc.size as usize],
            memory: desc.memory,
            address,
            label: desc.label.clone(),
        }))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.state.borrow_mut().buffers.remove(buffer);
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GfxResult<()> {
        let mut state = self.state.borrow_mut();
        let buffer = &mut state.buffers[buffer];
        if !buffer.memory.is_host_visible() {
            return Err(GfxError::NotHostVisible {
                label: buffer.label.clone(),
            });
        }
        Self::check_range(&buffer.label, offset, data.len() as u64, buffer.data.len() as u64)?;
        buffer.data[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, out: &mut [u8]) -> GfxResult<()> {
        let state = self.state.borrow();
        let buffer = &state.buffers[buffer];
        if !buffer.memory.is_host_visible() {
            return Err(GfxError::NotHostVisible {
                label: buffer.label.clone(),
            });
        }
        Self::check_range(&buffer.label, offset, out.len() as u64, buffer.data.len() as u64)?;
        out.copy_from_slice(&buffer.data[offset as usize..offset as usize + out.len()]);
        Ok(())
    }

    fn buffer_device_address(&self, buffer: BufferHandle) -> u64 {
        self.state.borrow().buffers[buffer].address
    }

    fn create_texture(&self, desc: &TextureDesc) -> GfxResult<TextureHandle> {
        let size = desc.width as usize * desc.height as usize * desc.format.texel_size() as usize;
        Ok(self.state.borrow_mut().textures.insert(MockTexture {
            data: vec![0; size],
            width: desc.width,
            height: desc.height,
            format: desc.format,
            state: TextureState::Undefined,
        }))
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        self.state.borrow_mut().textures.remove(texture);
    }

    fn create_descriptor_heap(&self, capacity: u32, _label: &str) -> GfxResult<DescriptorHeapInfo> {
        let mut state = self.state.borrow_mut();
        let offset = state.next_heap_offset;
        state.next_heap_offset += align_up(capacity as u64 * Self::DESCRIPTOR_INCREMENT, 0x1000);
        let heap = state.heaps.insert(MockHeap {
            views: vec![None; capacity as usize],
        });
        Ok(DescriptorHeapInfo {
            heap,
            cpu_start: 0x1000 + offset,
            gpu_start: 0xD000_0000 + offset,
            increment: Self::DESCRIPTOR_INCREMENT,
        })
    }

    fn write_descriptor(&self, heap: DescriptorHeapHandle, index: u32, view: &DescriptorView) {
        let mut state = self.state.borrow_mut();
        let heap = &mut state.heaps[heap];
        assert!((index as usize) < heap.views.len(), "descriptor index {index} out of heap range");
        heap.views[index as usize] = Some(*view);
    }

    fn destroy_descriptor_heap(&self, heap: DescriptorHeapHandle) {
        self.state.borrow_mut().heaps.remove(heap);
    }

    fn create_queue(&self, _kind: QueueKind, label: &str) -> GfxResult<QueueHandle> {
        Ok(self.state.borrow_mut().queues.insert(MockQueue {
            label: label.to_string(),
            busy_until: Instant::now(),
        }))
    }

    fn create_timeline(&self, label: &str) -> GfxResult<TimelineHandle> {
        Ok(self.state.borrow_mut().timelines.insert(MockTimeline {
            label: label.to_string(),
            signals: Vec::new(),
        }))
    }

    fn timeline_completed_value(&self, timeline: TimelineHandle) -> GfxResult<u64> {
        let now = Instant::now();
        let state = self.state.borrow();
        Ok(state.timelines[timeline]
            .signals
            .iter()
            .filter(|(_, ready)| *ready <= now)
            .map(|(value, _)| *value)
            .max()
            .unwrap_or(0))
    }

    fn wait_timeline(&self, timeline: TimelineHandle, value: u64) -> GfxResult<()> {
        let ready = Self::signal_time(&self.state.borrow(), timeline, value)?;
        if let Some(ready) = ready {
            let now = Instant::now();
            if ready > now {
                std::thread::sleep(ready - now);
            }
        }
        Ok(())
    }

    fn destroy_timeline(&self, timeline: TimelineHandle) {
        self.state.borrow_mut().timelines.remove(timeline);
    }

    fn create_command_storage(&self, queue: QueueHandle, _label: &str) -> GfxResult<CommandStorageHandle> {
        Ok(self.state.borrow_mut().storages.insert(MockStorage { queue, resets: 0 }))
    }

    fn reset_command_storage(&self, storage: CommandStorageHandle) -> GfxResult<()> {
        self.state.borrow_mut().storages[storage].resets += 1;
        Ok(())
    }

    fn destroy_command_storage(&self, storage: CommandStorageHandle) {
        self.state.borrow_mut().storages.remove(storage);
    }

    fn submit(&self, queue: QueueHandle, batch: SubmitBatch<'_>) -> GfxResult<()> {
        let mut state = self.state.borrow_mut();
        let now = Instant::now();

        let mut start = now.max(state.queues[queue].busy_until);
        for (timeline, value) in &batch.waits {
            if let Some(ready) = Self::signal_time(&state, *timeline, *value)? {
                start = start.max(ready);
            }
        }

        let mut recorded = Vec::new();
        if let Some((storage, commands)) = batch.commands {
            debug_assert_eq!(state.storages[storage].queue, queue, "command storage submitted to another queue");
            for command in commands {
                Self::execute(&mut state, command)?;
            }
            recorded = commands.to_vec();
        }

        let ready = if batch.commands.is_some() { start + self.latency } else { start };
        state.queues[queue].busy_until = ready;

        if let Some((timeline, value)) = batch.signal {
            let timeline = &mut state.timelines[timeline];
            debug_assert!(
                timeline.signals.last().is_none_or(|(last, _)| *last < value),
                "timeline '{}' signaled with a non-increasing value {value}",
                timeline.label
            );
            timeline.signals.push((value, ready));
        }

        let queue_label = state.queues[queue].label.clone();
        state.submissions.push(SubmissionRecord {
            queue,
            queue_label,
            commands: recorded,
            waits: batch.waits,
            signal: batch.signal,
        });
        Ok(())
    }

    fn acceleration_structure_sizes(&self, desc: &AsBuildDesc) -> AsPrebuildInfo {
        Self::prebuild_sizes(desc)
    }

    fn create_acceleration_structure(
        &self,
        kind: AsKind,
        buffer: BufferHandle,
        size: u64,
        _label: &str,
    ) -> GfxResult<AccelHandle> {
        let mut state = self.state.borrow_mut();
        let address = state.buffers[buffer].address;
        Ok(state.accels.insert(MockAccel {
            kind,
            size,
            address,
            built_flags: None,
            primitive_count: 0,
            builds: 0,
            updates: 0,
        }))
    }

    fn acceleration_structure_address(&self, accel: AccelHandle) -> u64 {
        let state = self.state.borrow();
        let accel = &state.accels[accel];
        debug_assert!(matches!(accel.kind, AsKind::BottomLevel | AsKind::TopLevel));
        accel.address
    }

    fn destroy_acceleration_structure(&self, accel: AccelHandle) {
        self.state.borrow_mut().accels.remove(accel);
    }

    fn create_binding_layout(&self, desc: &BindingLayoutDesc) -> GfxResult<BindingLayoutHandle> {
        if desc.push_constant_size > self.caps.max_push_constant_size {
            return Err(GfxError::BindingLayoutTooLarge {
                label: desc.label.clone(),
                required: desc.push_constant_size,
                limit: self.caps.max_push_constant_size,
            });
        }
        Ok(self.state.borrow_mut().layouts.insert(desc.clone()))
    }

    fn destroy_binding_layout(&self, layout: BindingLayoutHandle) {
        self.state.borrow_mut().layouts.remove(layout);
    }

    fn create_rt_pipeline(&self, desc: &RtPipelineDesc<'_>) -> GfxResult<PipelineHandle> {
        if self.fail_next_pipeline.replace(false) {
            return Err(GfxError::creation("rt pipeline", desc.label, "injected pipeline creation failure"));
        }
        if desc.binary.is_empty() {
            return Err(GfxError::creation("rt pipeline", desc.label, "empty shader binary"));
        }

        let mut state = self.state.borrow_mut();
        if !state.layouts.contains_key(desc.layout) {
            return Err(GfxError::creation("rt pipeline", desc.label, "unknown binding layout"));
        }
        let serial = state.next_pipeline_serial;
        state.next_pipeline_serial += 1;
        Ok(state.pipelines.insert(MockPipeline {
            serial,
            group_count: desc.group_count(),
        }))
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc<'_>) -> GfxResult<PipelineHandle> {
        if self.fail_next_pipeline.replace(false) {
            return Err(GfxError::creation("compute pipeline", desc.label, "injected pipeline creation failure"));
        }
        if desc.binary.is_empty() {
            return Err(GfxError::creation("compute pipeline", desc.label, "empty shader binary"));
        }

        let mut state = self.state.borrow_mut();
        if !state.layouts.contains_key(desc.layout) {
            return Err(GfxError::creation("compute pipeline", desc.label, "unknown binding layout"));
        }
        let serial = state.next_pipeline_serial;
        state.next_pipeline_serial += 1;
        // compute 管线没有 shader group
        Ok(state.pipelines.insert(MockPipeline { serial, group_count: 0 }))
    }

    fn shader_group_handles(&self, pipeline: PipelineHandle, group_count: u32) -> GfxResult<Vec<u8>> {
        let state = self.state.borrow();
        let pipeline = &state.pipelines[pipeline];
        assert!(group_count <= pipeline.group_count, "requested {group_count} groups, pipeline has {}", pipeline.group_count);

        let handle_size = Self::HANDLE_SIZE as usize;
        let mut handles = vec![0u8; handle_size * group_count as usize];
        for (group, handle) in handles.chunks_exact_mut(handle_size).enumerate() {
            handle[0..8].copy_from_slice(&pipeline.serial.to_le_bytes());
            handle[8..12].copy_from_slice(&(group as u32).to_le_bytes());
        }
        Ok(handles)
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        self.state.borrow_mut().pipelines.remove(pipeline);
    }
}

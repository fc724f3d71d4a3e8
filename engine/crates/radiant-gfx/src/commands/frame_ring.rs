use crate::{
    commands::{command_queue::ExecutionQueue, command_recorder::CommandRecorder},
    error::GfxResult,
};

/// 同时在 GPU 上执行的帧数
pub const FRAMES_IN_FLIGHT: usize = 3;

/// 一个帧槽位，持有一个 recorder 以及它上一次提交的退休值
pub struct FrameSlot {
    index: usize,
    recorder: CommandRecorder,
    retirement: u64,
}
impl FrameSlot {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
    #[inline]
    pub fn retirement_value(&self) -> u64 {
        self.retirement
    }
}

/// FRAMES_IN_FLIGHT 个帧槽位组成的环
///
/// 第 N + FRAMES_IN_FLIGHT 帧只有在第 N 帧的退休值完成之后才能开始录制
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    /// 当前的帧序号，一直累加
    frame_id: u64,
    in_frame: bool,
}

// new & init
impl FrameRing {
    pub fn new(queue: &ExecutionQueue, slot_count: usize) -> GfxResult<Self> {
        assert!(slot_count > 0, "frame ring needs at least one slot");
        let slots = (0..slot_count)
            .map(|index| {
                Ok(FrameSlot {
                    index,
                    recorder: queue.new_recorder(format!("frame-{}", Self::slot_label(index)))?,
                    retirement: 0,
                })
            })
            .collect::<GfxResult<Vec<_>>>()?;

        Ok(Self {
            slots,
            frame_id: 0,
            in_frame: false,
        })
    }
}

// getters
impl FrameRing {
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub fn current_slot_index(&self) -> usize {
        (self.frame_id % self.slots.len() as u64) as usize
    }
    #[inline]
    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[self.current_slot_index()]
    }
    #[inline]
    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }
    #[inline]
    pub fn frame_label(&self) -> char {
        Self::slot_label(self.current_slot_index())
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_label())
    }
    #[inline]
    pub fn in_frame(&self) -> bool {
        self.in_frame
    }

    #[inline]
    fn slot_label(index: usize) -> char {
        (b'A' + (index % 26) as u8) as char
    }
}

// update
impl FrameRing {
    /// 等待当前槽位上一次的提交完成，然后 reset 它的 recorder
    pub fn begin_frame(&mut self, queue: &ExecutionQueue) -> GfxResult<&mut CommandRecorder> {
        let _span = radiant_crate_tools::profile_span!("FrameRing::begin_frame");
        assert!(!self.in_frame, "begin_frame called twice without end_frame");

        let index = self.current_slot_index();
        let frame_name = self.frame_name();
        self.slots[index].recorder.reset(queue.fence())?;
        self.in_frame = true;

        let recorder = &mut self.slots[index].recorder;
        recorder.begin_label(frame_name);
        Ok(recorder)
    }

    /// 当前帧正在录制的 recorder
    pub fn current_recorder(&mut self) -> &mut CommandRecorder {
        assert!(self.in_frame, "no frame is being recorded");
        let index = self.current_slot_index();
        &mut self.slots[index].recorder
    }

    /// 提交当前槽位，并进入下一帧
    pub fn end_frame(&mut self, queue: &ExecutionQueue) -> GfxResult<u64> {
        assert!(self.in_frame, "end_frame called without begin_frame");

        let index = self.current_slot_index();
        let slot = &mut self.slots[index];
        slot.recorder.end_label();
        let value = queue.submit(&mut slot.recorder)?;
        slot.retirement = value;

        self.in_frame = false;
        self.frame_id = self.frame_id.wrapping_add(1);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        rc::Rc,
        time::{Duration, Instant},
    };

    use super::*;
    use crate::{
        backend::{mock::MockBackend, types::QueueKind},
        commands::gfx_command::BarrierScope,
        foundation::device::DeviceHandle,
    };

    #[test]
    fn test_frame_name_and_slots() {
        let queue =
            ExecutionQueue::new(DeviceHandle::new(Rc::new(MockBackend::new())), QueueKind::Graphics, "gfx").unwrap();
        let mut ring = FrameRing::new(&queue, FRAMES_IN_FLIGHT).unwrap();
        assert_eq!(ring.frame_name(), "[F0A]");

        for expected in [0, 1, 2, 0, 1] {
            assert_eq!(ring.current_slot_index(), expected);
            ring.begin_frame(&queue).unwrap();
            ring.end_frame(&queue).unwrap();
        }
        assert_eq!(ring.frame_name(), "[F5C]");
    }

    #[test]
    fn test_begin_frame_applies_backpressure() {
        let latency = Duration::from_millis(25);
        let queue = ExecutionQueue::new(
            DeviceHandle::new(Rc::new(MockBackend::with_latency(latency))),
            QueueKind::Graphics,
            "gfx",
        )
        .unwrap();
        let mut ring = FrameRing::new(&queue, FRAMES_IN_FLIGHT).unwrap();

        let start = Instant::now();
        let mut values = Vec::new();
        for _ in 0..FRAMES_IN_FLIGHT {
            ring.begin_frame(&queue).unwrap().memory_barrier(BarrierScope::Full);
            values.push(ring.end_frame(&queue).unwrap());
        }
        // 前 FRAMES_IN_FLIGHT 帧不需要等待
        assert!(!queue.is_complete(values[0]));

        // 第 FRAMES_IN_FLIGHT 帧复用第 0 帧的槽位，必须等它完成
        ring.begin_frame(&queue).unwrap();
        assert!(queue.is_complete(values[0]));
        assert!(start.elapsed() >= latency);
        assert_eq!(ring.current_slot().retirement_value(), values[0]);
        ring.end_frame(&queue).unwrap();
    }

    #[test]
    #[should_panic(expected = "without end_frame")]
    fn test_nested_begin_panics() {
        let queue =
            ExecutionQueue::new(DeviceHandle::new(Rc::new(MockBackend::new())), QueueKind::Graphics, "gfx").unwrap();
        let mut ring = FrameRing::new(&queue, 2).unwrap();
        ring.begin_frame(&queue).unwrap();
        ring.begin_frame(&queue).unwrap();
    }
}

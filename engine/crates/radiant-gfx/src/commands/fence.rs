use std::cell::Cell;

use crate::{
    commands::command_queue::ExecutionQueue,
    error::{GfxError, GfxResult},
    foundation::device::DeviceHandle,
    resources::handles::TimelineHandle,
};

/// 单调递增的完成计数，设备侧是一个 timeline
///
/// 值 v 在设备报告的完成值 >= v 时退休
pub struct Fence {
    timeline: TimelineHandle,
    last_signaled: Cell<u64>,
    /// 最近一次查询到的完成值
    completed: Cell<u64>,
    label: String,

    device: DeviceHandle,
}

// new & init
impl Fence {
    pub fn new(device: DeviceHandle, label: impl AsRef<str>) -> GfxResult<Self> {
        let label = label.as_ref().to_string();
        let timeline = device.backend().create_timeline(&label)?;
        Ok(Self {
            timeline,
            last_signaled: Cell::new(0),
            completed: Cell::new(0),
            label,
            device,
        })
    }
}

// getters
impl Fence {
    #[inline]
    pub fn timeline(&self) -> TimelineHandle {
        self.timeline
    }

    #[inline]
    pub fn last_signaled(&self) -> u64 {
        self.last_signaled.get()
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }
}

// tools
impl Fence {
    /// 预留下一个值，由队列在提交时 signal
    #[inline]
    pub(crate) fn next_value(&self) -> u64 {
        self.last_signaled.get() + 1
    }

    #[inline]
    pub(crate) fn mark_signaled(&self, value: u64) {
        debug_assert!(value > self.last_signaled.get());
        self.last_signaled.set(value);
    }

    /// 在队列上 signal 一个新的值
    pub fn signal(&self, queue: &ExecutionQueue) -> GfxResult<u64> {
        let value = self.next_value();
        queue.submit_signal(self.timeline, value)?;
        self.mark_signaled(value);
        Ok(value)
    }

    /// 设备报告的完成值
    ///
    /// 查询失败时记录错误，并返回上一次的结果
    pub fn completed_value(&self) -> u64 {
        match self.device.backend().timeline_completed_value(self.timeline) {
            Ok(value) => {
                self.completed.set(self.completed.get().max(value));
            }
            Err(err) => {
                log::error!("failed to query fence '{}': {}", self.label, err);
            }
        }
        self.completed.get()
    }

    #[inline]
    pub fn is_complete(&self, value: u64) -> bool {
        value <= self.completed.get() || value <= self.completed_value()
    }

    /// 阻塞直到 value 完成，已经完成时立即返回
    pub fn wait_for(&self, value: u64) -> GfxResult<()> {
        if self.is_complete(value) {
            return Ok(());
        }
        if value > self.last_signaled.get() {
            return Err(GfxError::WaitOnUnsignaled {
                label: self.label.clone(),
                value,
            });
        }

        let _span = radiant_crate_tools::profile_span!("Fence::wait_for");
        self.device.backend().wait_timeline(self.timeline, value)?;
        self.completed.set(self.completed.get().max(value));
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.device.backend().destroy_timeline(self.timeline);
    }
}

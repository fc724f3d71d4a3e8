use std::cell::RefCell;

use crate::{
    backend::{SubmitBatch, types::QueueKind},
    commands::{command_recorder::CommandRecorder, fence::Fence},
    error::GfxResult,
    foundation::device::DeviceHandle,
    resources::handles::{QueueHandle, TimelineHandle},
};

/// 提交命令的队列，每次提交都会产生一个新的 FenceValue
///
/// 负责跨队列同步、flush，以及一次性 recorder 的对象池
pub struct ExecutionQueue {
    handle: QueueHandle,
    kind: QueueKind,
    label: String,

    fence: Fence,
    /// 下一次提交需要等待的其他队列的值
    pending_waits: RefCell<Vec<(TimelineHandle, u64)>>,
    /// 已经提交过的一次性 recorder，只有退休之后才能复用
    recorder_pool: RefCell<Vec<CommandRecorder>>,

    device: DeviceHandle,
}

// new & init
impl ExecutionQueue {
    pub fn new(device: DeviceHandle, kind: QueueKind, label: impl AsRef<str>) -> GfxResult<Self> {
        let label = label.as_ref().to_string();
        let handle = device.backend().create_queue(kind, &label)?;
        let fence = Fence::new(device.clone(), format!("{}-fence", label))?;
        log::info!("queue '{}' ({:?}) created", label, kind);

        Ok(Self {
            handle,
            kind,
            label,
            fence,
            pending_waits: RefCell::new(Vec::new()),
            recorder_pool: RefCell::new(Vec::new()),
            device,
        })
    }
}

// getters
impl ExecutionQueue {
    #[inline]
    pub fn handle(&self) -> QueueHandle {
        self.handle
    }
    #[inline]
    pub fn kind(&self) -> QueueKind {
        self.kind
    }
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }
    #[inline]
    pub fn fence(&self) -> &Fence {
        &self.fence
    }
    #[inline]
    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }
    #[inline]
    pub fn last_signaled(&self) -> u64 {
        self.fence.last_signaled()
    }
    #[inline]
    pub fn completed_value(&self) -> u64 {
        self.fence.completed_value()
    }
    #[inline]
    pub fn is_complete(&self, value: u64) -> bool {
        self.fence.is_complete(value)
    }
    #[inline]
    pub fn wait_for(&self, value: u64) -> GfxResult<()> {
        self.fence.wait_for(value)
    }
    #[inline]
    pub fn pooled_recorder_count(&self) -> usize {
        self.recorder_pool.borrow().len()
    }
}

// 提交与同步
impl ExecutionQueue {
    /// 提交 recorder，并 signal 队列的 fence
    ///
    /// 还在 Recording 的 recorder 会先被关闭。返回的值同时记录在 recorder 上，作为它的退休值
    pub fn submit(&self, recorder: &mut CommandRecorder) -> GfxResult<u64> {
        let _span = radiant_crate_tools::profile_span!("ExecutionQueue::submit");
        debug_assert_eq!(recorder.queue(), self.handle, "recorder '{}' belongs to another queue", recorder.label());

        recorder.close();
        let value = self.fence.next_value();
        self.device.backend().submit(
            self.handle,
            SubmitBatch {
                commands: Some((recorder.storage(), recorder.commands())),
                waits: self.pending_waits.take(),
                signal: Some((self.fence.timeline(), value)),
            },
        )?;
        self.fence.mark_signaled(value);
        recorder.set_retirement(value);
        Ok(value)
    }

    /// 不带命令的提交，只 signal 指定的 timeline
    pub(crate) fn submit_signal(&self, timeline: TimelineHandle, value: u64) -> GfxResult<()> {
        self.device.backend().submit(
            self.handle,
            SubmitBatch {
                commands: None,
                waits: self.pending_waits.take(),
                signal: Some((timeline, value)),
            },
        )
    }

    #[inline]
    pub fn signal(&self) -> GfxResult<u64> {
        self.fence.signal(self)
    }

    /// signal 然后阻塞等待，用于销毁之前以及破坏性的 pipeline 重建之前
    pub fn flush(&self) -> GfxResult<u64> {
        let _span = radiant_crate_tools::profile_span!("ExecutionQueue::flush");
        let value = self.signal()?;
        self.fence.wait_for(value)?;
        Ok(value)
    }

    /// 下一次提交会等待 other 队列最近一次 signal 的值
    pub fn synchronize_with(&self, other: &ExecutionQueue) {
        let value = other.last_signaled();
        if value == 0 {
            return;
        }
        let mut waits = self.pending_waits.borrow_mut();
        let timeline = other.fence().timeline();
        match waits.iter_mut().find(|(waiting, _)| *waiting == timeline) {
            Some((_, waiting_value)) => *waiting_value = (*waiting_value).max(value),
            None => waits.push((timeline, value)),
        }
    }
}

// recorder
impl ExecutionQueue {
    /// 创建一个属于该队列的 recorder，FrameSlot 使用
    pub fn new_recorder(&self, label: impl AsRef<str>) -> GfxResult<CommandRecorder> {
        CommandRecorder::new(self.device.clone(), self.handle, label)
    }

    /// 从对象池中取出一个已经退休的 recorder，没有时创建新的
    pub fn acquire_recorder(&self, label: impl AsRef<str>) -> GfxResult<CommandRecorder> {
        let retired = {
            let mut pool = self.recorder_pool.borrow_mut();
            let position = pool.iter().position(|recorder| self.fence.is_complete(recorder.retirement_value()));
            position.map(|position| pool.swap_remove(position))
        };

        match retired {
            Some(mut recorder) => {
                recorder.reset(&self.fence)?;
                recorder.set_label(label);
                Ok(recorder)
            }
            None => self.new_recorder(label),
        }
    }

    /// 提交一次性 recorder，并将其放回对象池
    pub fn execute(&self, mut recorder: CommandRecorder) -> GfxResult<u64> {
        let value = self.submit(&mut recorder)?;
        self.recorder_pool.borrow_mut().push(recorder);
        Ok(value)
    }

    /// 立即执行某个 command，并同步等待执行结果
    pub fn one_time_exec<F, R>(&self, label: impl AsRef<str>, func: F) -> GfxResult<R>
    where
        F: FnOnce(&mut CommandRecorder) -> R,
    {
        let mut recorder = self.acquire_recorder(format!("one-time-{}", label.as_ref()))?;
        recorder.begin_label(label.as_ref());
        let result = func(&mut recorder);
        recorder.end_label();

        let value = self.execute(recorder)?;
        self.fence.wait_for(value)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        rc::Rc,
        time::{Duration, Instant},
    };

    use super::*;
    use crate::{backend::mock::MockBackend, commands::gfx_command::BarrierScope, error::GfxError};

    fn queue_with(backend: Rc<MockBackend>, label: &str) -> ExecutionQueue {
        ExecutionQueue::new(DeviceHandle::new(backend), QueueKind::Graphics, label).unwrap()
    }

    #[test]
    fn test_fence_values_strictly_increase() {
        let backend = Rc::new(MockBackend::with_latency(Duration::from_millis(20)));
        let queue = queue_with(backend, "gfx");

        let mut last = 0;
        for _ in 0..4 {
            let mut recorder = queue.new_recorder("cmd").unwrap();
            recorder.memory_barrier(BarrierScope::Full);
            let value = queue.submit(&mut recorder).unwrap();
            assert!(value > last);
            assert_eq!(recorder.retirement_value(), value);
            last = value;
        }
        // 延迟内还没有完成
        assert!(!queue.is_complete(last));

        queue.wait_for(last).unwrap();
        assert!(queue.is_complete(last));
        assert!(queue.completed_value() >= last);
    }

    #[test]
    fn test_flush_waits_for_prior_work() {
        let latency = Duration::from_millis(15);
        let backend = Rc::new(MockBackend::with_latency(latency));
        let queue = queue_with(backend, "gfx");

        let start = Instant::now();
        let mut recorder = queue.new_recorder("cmd").unwrap();
        let submitted = queue.submit(&mut recorder).unwrap();
        let flushed = queue.flush().unwrap();

        assert!(flushed > submitted);
        assert!(queue.is_complete(submitted));
        assert!(start.elapsed() >= latency);
    }

    #[test]
    fn test_wait_on_unsignaled_value_errors() {
        let queue = queue_with(Rc::new(MockBackend::new()), "gfx");
        assert!(matches!(queue.wait_for(5), Err(GfxError::WaitOnUnsignaled { value: 5, .. })));
    }

    #[test]
    fn test_synchronize_with_records_cross_queue_wait() {
        let backend = Rc::new(MockBackend::new());
        let gfx = queue_with(backend.clone(), "gfx");
        let upload = ExecutionQueue::new(DeviceHandle::new(backend.clone()), QueueKind::Upload, "upload").unwrap();

        let upload_value = upload.signal().unwrap();
        gfx.synchronize_with(&upload);
        let mut recorder = gfx.new_recorder("after-upload").unwrap();
        gfx.submit(&mut recorder).unwrap();

        let submissions = backend.submissions();
        let last = submissions.last().unwrap();
        assert_eq!(last.queue_label, "gfx");
        assert_eq!(last.waits, vec![(upload.fence().timeline(), upload_value)]);

        // 等待只作用于下一次提交
        gfx.signal().unwrap();
        assert!(backend.submissions().last().unwrap().waits.is_empty());
    }

    #[test]
    fn test_recorder_pool_reuses_only_retired() {
        let backend = Rc::new(MockBackend::with_latency(Duration::from_millis(30)));
        let queue = queue_with(backend.clone(), "gfx");

        let first = queue.acquire_recorder("a").unwrap();
        let first_storage = first.storage();
        let value = queue.execute(first).unwrap();
        assert_eq!(queue.pooled_recorder_count(), 1);

        // 还在执行中，不能复用
        let second = queue.acquire_recorder("b").unwrap();
        assert_ne!(second.storage(), first_storage);
        assert_eq!(queue.pooled_recorder_count(), 1);
        drop(second);

        queue.wait_for(value).unwrap();
        let third = queue.acquire_recorder("c").unwrap();
        assert_eq!(third.storage(), first_storage);
        assert_eq!(backend.storage_reset_count(first_storage), 1);
        assert_eq!(third.label(), "c");
        assert!(!third.is_closed());
    }

    #[test]
    fn test_one_time_exec_returns_after_completion() {
        let backend = Rc::new(MockBackend::with_latency(Duration::from_millis(10)));
        let queue = queue_with(backend, "gfx");
        let result = queue
            .one_time_exec("barrier", |cmd| {
                cmd.memory_barrier(BarrierScope::AccelerationStructure);
                42
            })
            .unwrap();
        assert_eq!(result, 42);
        assert!(queue.is_complete(queue.last_signaled()));
    }

    #[test]
    #[should_panic(expected = "closed command recorder")]
    fn test_recording_into_closed_recorder_panics() {
        let queue = queue_with(Rc::new(MockBackend::new()), "gfx");
        let mut recorder = queue.new_recorder("closed").unwrap();
        recorder.close();
        recorder.memory_barrier(BarrierScope::Full);
    }

    #[test]
    fn test_reset_reopens_after_retirement() {
        let backend = Rc::new(MockBackend::with_latency(Duration::from_millis(10)));
        let queue = queue_with(backend, "gfx");
        let mut recorder = queue.new_recorder("cycle").unwrap();
        recorder.memory_barrier(BarrierScope::Full);
        let value = queue.submit(&mut recorder).unwrap();
        assert!(recorder.is_closed());

        recorder.reset(queue.fence()).unwrap();
        assert!(queue.is_complete(value));
        assert!(recorder.commands().is_empty());
        recorder.memory_barrier(BarrierScope::Full);
    }
}

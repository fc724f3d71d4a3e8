use std::{
    cell::{Cell, Ref, RefCell, RefMut},
    rc::Rc,
};

use crate::{
    backend::{GfxBackend, types::QueueKind},
    commands::command_queue::ExecutionQueue,
    config::GfxConfig,
    descriptors::descriptor_table::DescriptorTable,
    error::{GfxError, GfxResult},
    foundation::device::DeviceHandle,
    resources::allocator::GpuMemoryAllocator,
    upload::upload_stager::UploadStager,
};

/// 渲染所需的全局对象：设备、内存分配器、图形队列、描述符表以及上传器
///
/// 通过引用传递，不存在全局单例
pub struct RenderContext {
    // 字段的顺序就是 drop 的顺序，device 必须最后释放
    upload: RefCell<UploadStager>,
    descriptor_table: RefCell<DescriptorTable>,
    queue: ExecutionQueue,
    allocator: GpuMemoryAllocator,
    device: DeviceHandle,

    config: GfxConfig,
    shut_down: Cell<bool>,
}

// new & init
impl RenderContext {
    pub fn new(backend: Rc<dyn GfxBackend>, config: GfxConfig) -> GfxResult<Self> {
        let _span = radiant_crate_tools::profile_span!("RenderContext::new");
        let device = DeviceHandle::new(backend);
        if !device.supports_ray_tracing() {
            return Err(GfxError::Unsupported(format!(
                "device '{}' does not support hardware ray tracing",
                device.adapter_name()
            )));
        }

        let allocator = GpuMemoryAllocator::new(device.clone());
        let queue = ExecutionQueue::new(device.clone(), QueueKind::Graphics, "graphics")?;
        let descriptor_table = DescriptorTable::new(device.clone(), config.descriptor_capacity, "bindless")?;
        let upload = UploadStager::new(device.clone(), allocator.clone(), config.upload_row_alignment)?;

        log::info!(
            "render context created on '{}': {} descriptors, {} frames in flight",
            device.adapter_name(),
            config.descriptor_capacity,
            config.frames_in_flight
        );

        Ok(Self {
            upload: RefCell::new(upload),
            descriptor_table: RefCell::new(descriptor_table),
            queue,
            allocator,
            device,
            config,
            shut_down: Cell::new(false),
        })
    }

    /// 等待所有的上传以及图形队列完成
    ///
    /// 可以重复调用，drop 时会自动调用
    pub fn shutdown(&self) -> GfxResult<()> {
        if self.shut_down.get() {
            return Ok(());
        }
        let _span = radiant_crate_tools::profile_span!("RenderContext::shutdown");

        self.upload.borrow_mut().flush()?;
        self.queue.flush()?;
        self.shut_down.set(true);
        log::info!("render context shut down");
        Ok(())
    }
}

// getters
impl RenderContext {
    #[inline]
    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }
    #[inline]
    pub fn allocator(&self) -> &GpuMemoryAllocator {
        &self.allocator
    }
    /// 图形队列
    #[inline]
    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }
    #[inline]
    pub fn descriptor_table(&self) -> Ref<'_, DescriptorTable> {
        self.descriptor_table.borrow()
    }
    #[inline]
    pub fn descriptor_table_mut(&self) -> RefMut<'_, DescriptorTable> {
        self.descriptor_table.borrow_mut()
    }
    #[inline]
    pub fn upload(&self) -> RefMut<'_, UploadStager> {
        self.upload.borrow_mut()
    }
    #[inline]
    pub fn config(&self) -> &GfxConfig {
        &self.config
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("render context shutdown failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        backend::{
            mock::MockBackend,
            types::{BufferUsage, MemoryKind},
        },
        commands::gfx_command::BarrierScope,
    };

    #[test]
    fn test_requires_ray_tracing() {
        let backend = Rc::new(MockBackend::new().without_ray_tracing());
        assert!(matches!(RenderContext::new(backend, GfxConfig::default()), Err(GfxError::Unsupported(_))));
    }

    #[test]
    fn test_descriptor_capacity_from_config() {
        let config = GfxConfig {
            descriptor_capacity: 2,
            ..Default::default()
        };
        let ctx = RenderContext::new(Rc::new(MockBackend::new()), config).unwrap();
        assert_eq!(ctx.descriptor_table().capacity(), 2);

        let mut table = ctx.descriptor_table_mut();
        table.allocate().unwrap();
        table.allocate().unwrap();
        assert!(matches!(table.allocate(), Err(GfxError::DescriptorCapacityExceeded { .. })));
    }

    #[test]
    fn test_shutdown_drains_queues() {
        let backend = Rc::new(MockBackend::with_latency(Duration::from_millis(10)));
        let ctx = RenderContext::new(backend, GfxConfig::default()).unwrap();

        let dst = ctx.allocator().create_buffer(4, BufferUsage::STORAGE, MemoryKind::DeviceLocal, "dst").unwrap();
        ctx.upload().upload(&dst, &[1, 2, 3, 4]).unwrap();
        let mut recorder = ctx.queue().new_recorder("work").unwrap();
        recorder.memory_barrier(BarrierScope::Full);
        let value = ctx.queue().submit(&mut recorder).unwrap();

        ctx.shutdown().unwrap();
        assert!(ctx.queue().is_complete(value));
        assert_eq!(ctx.upload().pending_count(), 0);
        // 第二次调用不会再提交
        let signaled = ctx.queue().last_signaled();
        ctx.shutdown().unwrap();
        assert_eq!(ctx.queue().last_signaled(), signaled);
    }
}

use std::{cell::RefCell, rc::Rc};

use crate::{
    backend::types::{BufferDesc, BufferUsage, MemoryKind},
    error::{GfxError, GfxResult},
    foundation::device::DeviceHandle,
    resources::{allocator::AllocationStats, handles::BufferHandle},
};

/// GPU 上的一块 buffer
///
/// 只有一个 owner，只能 move；drop 时释放后端的内存。
/// 如果 GPU 可能还在使用它，需要交给 [`ReleaseQueue`](crate::resources::release_queue::ReleaseQueue)
pub struct GpuBuffer {
    handle: BufferHandle,
    size: u64,
    usage: BufferUsage,
    memory: MemoryKind,
    device_address: u64,
    label: String,

    device: DeviceHandle,
    stats: Rc<RefCell<AllocationStats>>,
}

// new & init
impl GpuBuffer {
    pub(crate) fn new(
        device: DeviceHandle,
        stats: Rc<RefCell<AllocationStats>>,
        handle: BufferHandle,
        desc: BufferDesc,
        device_address: u64,
    ) -> Self {
        Self {
            handle,
            size: desc.size,
            usage: desc.usage,
            memory: desc.memory,
            device_address,
            label: desc.label,
            device,
            stats,
        }
    }
}

// getters
impl GpuBuffer {
    #[inline]
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }
    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
    #[inline]
    pub fn memory_kind(&self) -> MemoryKind {
        self.memory
    }
    #[inline]
    pub fn device_address(&self) -> u64 {
        self.device_address
    }
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }
}

// tools
impl GpuBuffer {
    fn check_access(&self, offset: u64, len: u64) -> GfxResult<()> {
        if !self.memory.is_host_visible() {
            return Err(GfxError::NotHostVisible {
                label: self.label.clone(),
            });
        }
        if offset.checked_add(len).is_none_or(|end| end > self.size) {
            return Err(GfxError::OutOfBounds {
                label: self.label.clone(),
                offset,
                len,
                size: self.size,
            });
        }
        Ok(())
    }

    /// 只能写入 CPU 可见的内存，device local 的内存需要通过 UploadStager
    pub fn write(&self, offset: u64, data: &[u8]) -> GfxResult<()> {
        self.check_access(offset, data.len() as u64)?;
        self.device.backend().write_buffer(self.handle, offset, data)
    }

    #[inline]
    pub fn write_pod<T: bytemuck::Pod>(&self, offset: u64, value: &T) -> GfxResult<()> {
        self.write(offset, bytemuck::bytes_of(value))
    }

    #[inline]
    pub fn write_slice<T: bytemuck::Pod>(&self, offset: u64, values: &[T]) -> GfxResult<()> {
        self.write(offset, bytemuck::cast_slice(values))
    }

    pub fn read(&self, offset: u64, out: &mut [u8]) -> GfxResult<()> {
        self.check_access(offset, out.len() as u64)?;
        self.device.backend().read_buffer(self.handle, offset, out)
    }

    pub fn read_vec(&self, offset: u64, len: usize) -> GfxResult<Vec<u8>> {
        let mut bytes = vec![0; len];
        self.read(offset, &mut bytes)?;
        Ok(bytes)
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        self.device.backend().destroy_buffer(self.handle);
        let mut stats = self.stats.borrow_mut();
        stats.live_buffers -= 1;
        stats.buffer_bytes -= self.size;
    }
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBuffer")
            .field("label", &self.label)
            .field("size", &self.size)
            .field("memory", &self.memory)
            .finish()
    }
}

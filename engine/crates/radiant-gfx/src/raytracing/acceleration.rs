//! Ray Tracing 所需的加速结构

use crate::{
    backend::types::{AsKind, BufferUsage, MemoryKind},
    error::GfxResult,
    foundation::device::DeviceHandle,
    resources::{allocator::GpuMemoryAllocator, buffer::GpuBuffer, handles::AccelHandle},
};

/// 一个加速结构，以及存放它的 buffer
///
/// 与 GpuBuffer 一样只有一个 owner，drop 时先销毁加速结构，再释放 buffer
pub struct AccelerationStructure {
    handle: AccelHandle,
    kind: AsKind,
    address: u64,
    buffer: GpuBuffer,

    device: DeviceHandle,
}

// new & init
impl AccelerationStructure {
    pub fn new(allocator: &GpuMemoryAllocator, kind: AsKind, size: u64, label: impl AsRef<str>) -> GfxResult<Self> {
        let label = label.as_ref();
        let buffer = allocator.create_buffer(
            size,
            BufferUsage::ACCELERATION_STRUCTURE_STORAGE,
            MemoryKind::DeviceLocal,
            format!("{}-storage", label),
        )?;

        let device = allocator.device().clone();
        let handle = device.backend().create_acceleration_structure(kind, buffer.handle(), buffer.size(), label)?;
        let address = device.backend().acceleration_structure_address(handle);
        log::debug!("{:?} acceleration structure '{}' created, {} bytes", kind, label, buffer.size());

        Ok(Self {
            handle,
            kind,
            address,
            buffer,
            device,
        })
    }
}

// getters
impl AccelerationStructure {
    #[inline]
    pub fn handle(&self) -> AccelHandle {
        self.handle
    }
    #[inline]
    pub fn kind(&self) -> AsKind {
        self.kind
    }
    #[inline]
    pub fn device_address(&self) -> u64 {
        self.address
    }
    #[inline]
    pub fn size(&self) -> u64 {
        self.buffer.size()
    }
    #[inline]
    pub fn label(&self) -> &str {
        self.buffer.label()
    }
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        self.device.backend().destroy_acceleration_structure(self.handle);
    }
}

impl std::fmt::Debug for AccelerationStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccelerationStructure")
            .field("kind", &self.kind)
            .field("address", &format_args!("{:#x}", self.address))
            .field("size", &self.buffer.size())
            .finish()
    }
}

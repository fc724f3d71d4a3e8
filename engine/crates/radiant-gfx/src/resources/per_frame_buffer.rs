use std::marker::PhantomData;

use crate::{
    backend::types::{BufferUsage, MemoryKind},
    error::GfxResult,
    resources::{allocator::GpuMemoryAllocator, buffer::GpuBuffer},
};

/// 每个帧槽位一个 CPU 可写的 buffer，常用于 constant buffer
///
/// 只有当前槽位的 buffer 可以被写入；其他槽位可能还在被 GPU 读取
pub struct PerFrameBuffer<T: bytemuck::Pod> {
    buffers: Vec<GpuBuffer>,
    _phantom: PhantomData<T>,
}

impl<T: bytemuck::Pod> PerFrameBuffer<T> {
    pub fn new(
        allocator: &GpuMemoryAllocator,
        slot_count: usize,
        usage: BufferUsage,
        label: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let buffers = (0..slot_count)
            .map(|slot| {
                allocator.create_buffer(
                    std::mem::size_of::<T>() as u64,
                    usage,
                    MemoryKind::Upload,
                    format!("{}-{}", label.as_ref(), slot),
                )
            })
            .collect::<GfxResult<Vec<_>>>()?;

        Ok(Self {
            buffers,
            _phantom: PhantomData,
        })
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn buffer(&self, slot: usize) -> &GpuBuffer {
        &self.buffers[slot]
    }

    #[inline]
    pub fn device_address(&self, slot: usize) -> u64 {
        self.buffers[slot].device_address()
    }

    /// 调用者需要保证 slot 上一次的提交已经完成
    #[inline]
    pub fn write(&self, slot: usize, value: &T) -> GfxResult<()> {
        self.buffers[slot].write_pod(0, value)
    }

    pub fn read(&self, slot: usize) -> GfxResult<T> {
        let bytes = self.buffers[slot].read_vec(0, std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{backend::mock::MockBackend, foundation::device::DeviceHandle};

    #[test]
    fn test_slots_are_independent() {
        let allocator = GpuMemoryAllocator::new(DeviceHandle::new(Rc::new(MockBackend::new())));
        let buffer = PerFrameBuffer::<[f32; 4]>::new(&allocator, 3, BufferUsage::UNIFORM, "camera").unwrap();
        assert_eq!(buffer.slot_count(), 3);
        assert_eq!(buffer.buffer(1).size(), 16);

        buffer.write(0, &[1.0; 4]).unwrap();
        buffer.write(2, &[3.0; 4]).unwrap();
        assert_eq!(buffer.read(0).unwrap(), [1.0; 4]);
        assert_eq!(buffer.read(1).unwrap(), [0.0; 4]);
        assert_eq!(buffer.read(2).unwrap(), [3.0; 4]);
        assert_ne!(buffer.device_address(0), buffer.device_address(1));
    }
}

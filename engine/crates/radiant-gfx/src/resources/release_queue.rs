use std::collections::VecDeque;

use crate::{
    descriptors::descriptor_table::{DescriptorAllocation, DescriptorTable},
    pipelines::shader_table::ShaderTable,
    raytracing::{acceleration::AccelerationStructure, tlas::Tlas},
    resources::{buffer::GpuBuffer, texture::GpuTexture},
};

/// 等待 GPU 使用完毕之后才能释放的资源
pub enum Releasable {
    Buffer(GpuBuffer),
    Texture(GpuTexture),
    AccelerationStructure(AccelerationStructure),
    Tlas(Box<Tlas>),
    /// 描述符表中从 index 开始的 count 个 slot
    Descriptor(DescriptorAllocation, u32),
}

impl From<GpuBuffer> for Releasable {
    fn from(value: GpuBuffer) -> Self {
        Self::Buffer(value)
    }
}
impl From<GpuTexture> for Releasable {
    fn from(value: GpuTexture) -> Self {
        Self::Texture(value)
    }
}
impl From<AccelerationStructure> for Releasable {
    fn from(value: AccelerationStructure) -> Self {
        Self::AccelerationStructure(value)
    }
}
impl From<Tlas> for Releasable {
    fn from(value: Tlas) -> Self {
        Self::Tlas(Box::new(value))
    }
}
impl From<ShaderTable> for Releasable {
    fn from(value: ShaderTable) -> Self {
        Self::Buffer(value.into_buffer())
    }
}
impl From<DescriptorAllocation> for Releasable {
    fn from(value: DescriptorAllocation) -> Self {
        Self::Descriptor(value, 1)
    }
}

/// 延迟释放的队列
///
/// 被替换掉但是 GPU 可能还在使用的资源（旧的 TLAS、resize 之前的 output texture）放在这里，
/// 等到对应的 FenceValue 完成之后才真正释放
#[derive(Default)]
pub struct ReleaseQueue {
    /// fence value 递增
    entries: VecDeque<(u64, Releasable)>,
}

impl ReleaseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    /// 在 fence_value 完成之后释放 resource
    pub fn defer(&mut self, resource: impl Into<Releasable>, fence_value: u64) {
        // 同一个队列上的 FenceValue 单调递增，保持有序以便 collect 时提前结束
        let position = self.entries.partition_point(|(value, _)| *value <= fence_value);
        self.entries.insert(position, (fence_value, resource.into()));
    }

    /// 释放所有 fence value <= completed 的资源，返回释放的数量
    pub fn collect(&mut self, completed: u64, descriptor_table: &mut DescriptorTable) -> usize {
        let mut released = 0;
        while self.entries.front().is_some_and(|(value, _)| *value <= completed) {
            let Some((_, resource)) = self.entries.pop_front() else {
                break;
            };
            if let Releasable::Descriptor(allocation, count) = resource {
                descriptor_table.free_range(allocation, count);
            }
            released += 1;
        }
        released
    }

    /// 释放所有资源，调用者需要保证 GPU 已经空闲
    pub fn clear(&mut self, descriptor_table: &mut DescriptorTable) {
        self.collect(u64::MAX, descriptor_table);
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{
        backend::{
            mock::MockBackend,
            types::{BufferUsage, MemoryKind},
        },
        foundation::device::DeviceHandle,
        resources::allocator::GpuMemoryAllocator,
    };

    #[test]
    fn test_release_gated_on_fence_value() {
        let device = DeviceHandle::new(Rc::new(MockBackend::new()));
        let allocator = GpuMemoryAllocator::new(device.clone());
        let mut table = DescriptorTable::new(device, 8, "table").unwrap();
        let mut queue = ReleaseQueue::new();

        let buffer = allocator.create_buffer(16, BufferUsage::STORAGE, MemoryKind::DeviceLocal, "old").unwrap();
        let slot = table.allocate().unwrap();
        queue.defer(buffer, 5);
        queue.defer(slot, 3);
        assert_eq!(queue.pending_count(), 2);

        assert_eq!(queue.collect(2, &mut table), 0);
        assert_eq!(allocator.stats().live_buffers, 1);
        assert_eq!(table.free_count(), 0);

        assert_eq!(queue.collect(4, &mut table), 1);
        assert_eq!(table.free_count(), 1);
        assert_eq!(allocator.stats().live_buffers, 1);

        assert_eq!(queue.collect(5, &mut table), 1);
        assert_eq!(allocator.stats().live_buffers, 0);
        assert_eq!(queue.pending_count(), 0);
    }
}

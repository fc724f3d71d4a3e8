#[cfg(debug_assertions)]
use std::collections::HashSet;

use crate::{
    backend::types::{DescriptorHeapInfo, DescriptorView},
    error::{GfxError, GfxResult},
    foundation::device::DeviceHandle,
    resources::handles::DescriptorHeapHandle,
};

/// 描述符表中的一个位置
///
/// `handle = start + index * increment`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorAllocation {
    pub index: u32,
    pub cpu_handle: u64,
    pub gpu_handle: u64,
}

/// 容量固定的描述符表
///
/// 分配时优先复用 free list 中的位置，否则移动游标。
/// 不是线程安全的，每帧只有一个写入者
pub struct DescriptorTable {
    info: DescriptorHeapInfo,
    capacity: u32,
    /// 从未被分配过的第一个位置
    cursor: u32,
    free_list: Vec<u32>,
    label: String,

    device: DeviceHandle,

    /// 用于检查 double free
    #[cfg(debug_assertions)]
    live: HashSet<u32>,
}

// new & init
impl DescriptorTable {
    pub fn new(device: DeviceHandle, capacity: u32, label: impl AsRef<str>) -> GfxResult<Self> {
        let label = label.as_ref().to_string();
        let info = device.backend().create_descriptor_heap(capacity, &label)?;
        log::info!("descriptor table '{}' created, capacity: {}", label, capacity);

        Ok(Self {
            info,
            capacity,
            cursor: 0,
            free_list: Vec::new(),
            label,
            device,

            #[cfg(debug_assertions)]
            live: HashSet::new(),
        })
    }
}

// getters
impl DescriptorTable {
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// 当前存活的分配数量
    #[inline]
    pub fn allocated(&self) -> u32 {
        self.cursor - self.free_list.len() as u32
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    #[inline]
    pub fn heap(&self) -> DescriptorHeapHandle {
        self.info.heap
    }

    #[inline]
    pub fn heap_info(&self) -> &DescriptorHeapInfo {
        &self.info
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// index 对应的 cpu/gpu handle
    #[inline]
    pub fn allocation_at(&self, index: u32) -> DescriptorAllocation {
        DescriptorAllocation {
            index,
            cpu_handle: self.info.cpu_start + index as u64 * self.info.increment,
            gpu_handle: self.info.gpu_start + index as u64 * self.info.increment,
        }
    }
}

// tools
impl DescriptorTable {
    #[inline]
    pub fn allocate(&mut self) -> GfxResult<DescriptorAllocation> {
        self.allocate_range(1)
    }

    /// 分配连续的 count 个位置，返回第一个
    ///
    /// 只有 count 为 1 时才会复用 free list
    pub fn allocate_range(&mut self, count: u32) -> GfxResult<DescriptorAllocation> {
        debug_assert!(count > 0);

        if count == 1 {
            if let Some(index) = self.free_list.pop() {
                #[cfg(debug_assertions)]
                self.live.insert(index);
                return Ok(self.allocation_at(index));
            }
        }

        if self.cursor + count > self.capacity {
            return Err(GfxError::DescriptorCapacityExceeded {
                label: self.label.clone(),
                requested: count,
                allocated: self.allocated(),
                capacity: self.capacity,
            });
        }

        let index = self.cursor;
        self.cursor += count;
        #[cfg(debug_assertions)]
        self.live.extend(index..index + count);
        Ok(self.allocation_at(index))
    }

    /// 调用者需要保证 GPU 已经不再使用这些位置
    #[inline]
    pub fn free(&mut self, allocation: DescriptorAllocation) {
        self.free_range(allocation, 1);
    }

    pub fn free_range(&mut self, allocation: DescriptorAllocation, count: u32) {
        for index in allocation.index..allocation.index + count {
            #[cfg(debug_assertions)]
            debug_assert!(self.live.remove(&index), "descriptor {index} of '{}' freed twice", self.label);
            self.free_list.push(index);
        }
    }

    pub fn write_view(&self, allocation: DescriptorAllocation, view: DescriptorView) {
        debug_assert!(allocation.index < self.cursor, "writing an unallocated descriptor");
        self.device.backend().write_descriptor(self.info.heap, allocation.index, &view);
    }
}

impl Drop for DescriptorTable {
    fn drop(&mut self) {
        log::info!("destroying descriptor table '{}'", self.label);
        self.device.backend().destroy_descriptor_heap(self.info.heap);
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::backend::mock::MockBackend;

    fn table(capacity: u32) -> DescriptorTable {
        DescriptorTable::new(DeviceHandle::new(Rc::new(MockBackend::new())), capacity, "test-table").unwrap()
    }

    #[test]
    fn test_handles_follow_increment() {
        let mut table = table(8);
        let a = table.allocate().unwrap();
        let b = table.allocate().unwrap();
        assert_eq!(b.index, a.index + 1);
        assert_eq!(b.gpu_handle - a.gpu_handle, MockBackend::DESCRIPTOR_INCREMENT);
        assert_eq!(b.cpu_handle - a.cpu_handle, MockBackend::DESCRIPTOR_INCREMENT);
    }

    #[test]
    fn test_free_list_reused_before_cursor() {
        let mut table = table(8);
        let allocs = (0..4).map(|_| table.allocate().unwrap()).collect::<Vec<_>>();
        table.free(allocs[1]);
        table.free(allocs[3]);

        // 从 free list 的尾部取出
        assert_eq!(table.allocate().unwrap().index, 3);
        assert_eq!(table.allocate().unwrap().index, 1);
        assert_eq!(table.allocate().unwrap().index, 4);
        assert_eq!(table.allocated(), 5);
    }

    #[test]
    fn test_range_allocation_bumps_cursor() {
        let mut table = table(8);
        let first = table.allocate().unwrap();
        table.free(first);

        let range = table.allocate_range(3).unwrap();
        assert_eq!(range.index, 1);
        assert_eq!(table.free_count(), 1);

        table.free_range(range, 3);
        assert_eq!(table.free_count(), 4);
        assert_eq!(table.allocated(), 0);
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut table = table(2);
        table.allocate().unwrap();
        table.allocate().unwrap();
        assert!(matches!(
            table.allocate(),
            Err(GfxError::DescriptorCapacityExceeded { capacity: 2, allocated: 2, .. })
        ));
        assert!(table.allocate_range(2).is_err());
    }

    #[test]
    fn test_randomized_reuse_keeps_indices_unique() {
        let mut table = table(64);
        let mut live: Vec<DescriptorAllocation> = Vec::new();
        let mut freed: Vec<u32> = Vec::new();

        // 固定种子的 LCG，保证可重复
        let mut seed = 0x2545_f491_u64;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as usize
        };

        for _ in 0..500 {
            if live.is_empty() || (next() % 3 != 0 && live.len() < 60) {
                let cursor_before = table.allocated() as usize + table.free_count();
                let alloc = table.allocate().unwrap();
                if let Some(expected) = freed.pop() {
                    // 有空闲位置时必须先复用，游标不能前进
                    assert_eq!(alloc.index, expected);
                    assert_eq!(table.allocated() as usize + table.free_count(), cursor_before);
                }
                assert!(live.iter().all(|other| other.index != alloc.index));
                live.push(alloc);
            } else {
                let alloc = live.swap_remove(next() % live.len());
                table.free(alloc);
                freed.push(alloc.index);
            }
        }
        assert_eq!(table.allocated() as usize, live.len());
    }

    #[test]
    fn test_write_view_lands_in_heap() {
        let backend = Rc::new(MockBackend::new());
        let device = DeviceHandle::new(backend.clone());
        let allocator = crate::resources::allocator::GpuMemoryAllocator::new(device.clone());
        let mut table = DescriptorTable::new(device, 4, "views").unwrap();

        let buffer = allocator
            .create_buffer(
                64,
                crate::backend::types::BufferUsage::STORAGE,
                crate::backend::types::MemoryKind::DeviceLocal,
                "b",
            )
            .unwrap();
        let alloc = table.allocate().unwrap();
        let view = DescriptorView::StorageBuffer {
            buffer: buffer.handle(),
            offset: 0,
            range: 64,
        };
        table.write_view(alloc, view);
        assert_eq!(backend.descriptor_at(table.heap(), alloc.index), Some(view));
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn test_double_free_panics() {
        let mut table = table(4);
        let alloc = table.allocate().unwrap();
        table.free(alloc);
        table.free(alloc);
    }
}

//! shader binding table
//!
//! 布局：raygen | miss * N | hit * M，每个区域的起始地址按照 base alignment 对齐

use crate::{
    backend::types::{BufferUsage, MemoryKind, ShaderTableProperties, StridedRegion},
    basic::align::{align_up, align_up_u32},
    error::GfxResult,
    resources::{allocator::GpuMemoryAllocator, buffer::GpuBuffer},
};

/// hit record 中跟在 shader identifier 之后的数据，shader 通过它找到 mesh 的数据
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct HitGroupRecord {
    pub vertex_buffer: u64,
    pub index_buffer: u64,
    pub material_index: u32,
    pub _pad: u32,
}

impl HitGroupRecord {
    pub fn new(vertex_buffer: u64, index_buffer: u64, material_index: u32) -> Self {
        Self {
            vertex_buffer,
            index_buffer,
            material_index,
            _pad: 0,
        }
    }
}

/// 各个区域的 stride 以及偏移
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderTableLayout {
    pub handle_size: u32,
    pub raygen_stride: u32,
    pub miss_stride: u32,
    pub hit_stride: u32,
    pub miss_offset: u64,
    pub hit_offset: u64,
    pub miss_count: u32,
    pub hit_count: u32,
    pub total_size: u64,
}

impl ShaderTableLayout {
    pub fn new(props: &ShaderTableProperties, miss_count: u32, hit_count: u32) -> Self {
        let handle_size = props.handle_size;
        let base_alignment = props.base_alignment as u64;

        // raygen 的 stride 必须等于它的 size
        let raygen_stride = align_up_u32(handle_size, props.handle_alignment);
        let miss_stride = raygen_stride;
        let hit_stride =
            align_up_u32(handle_size + std::mem::size_of::<HitGroupRecord>() as u32, props.handle_alignment);

        let miss_offset = align_up(raygen_stride as u64, base_alignment);
        let hit_offset = align_up(miss_offset + (miss_stride * miss_count) as u64, base_alignment);
        let total_size = hit_offset + (hit_stride * hit_count) as u64;

        Self {
            handle_size,
            raygen_stride,
            miss_stride,
            hit_stride,
            miss_offset,
            hit_offset,
            miss_count,
            hit_count,
            total_size,
        }
    }

    #[inline]
    fn miss_record_offset(&self, index: u32) -> u64 {
        self.miss_offset + (index * self.miss_stride) as u64
    }

    #[inline]
    fn hit_record_offset(&self, index: u32) -> u64 {
        self.hit_offset + (index * self.hit_stride) as u64
    }
}

/// trace_rays 需要的四个区域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShaderTableRegions {
    pub raygen: StridedRegion,
    pub miss: StridedRegion,
    pub hit: StridedRegion,
    pub callable: StridedRegion,
}

/// 一个 raygen record，N 个 miss record，每个 mesh instance 一个 hit record
///
/// 所有 hit record 都使用 pipeline 中的第一个 hit group，区别只在于 payload
pub struct ShaderTable {
    buffer: GpuBuffer,
    layout: ShaderTableLayout,
    records: Vec<HitGroupRecord>,
}

// new & init
impl ShaderTable {
    /// # params
    /// - handles：pipeline 中所有 group 的 identifier，顺序为 raygen，miss，hit group
    pub fn build(
        allocator: &GpuMemoryAllocator,
        handles: &[u8],
        props: &ShaderTableProperties,
        miss_count: u32,
        records: &[HitGroupRecord],
        label: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let _span = radiant_crate_tools::profile_span!("ShaderTable::build");
        let layout = ShaderTableLayout::new(props, miss_count, records.len() as u32);
        let buffer = allocator.create_buffer_with_alignment(
            layout.total_size,
            BufferUsage::SHADER_BINDING_TABLE,
            MemoryKind::Upload,
            Some(props.base_alignment as u64),
            format!("{}-sbt", label.as_ref()),
        )?;

        let table = Self {
            buffer,
            layout,
            records: records.to_vec(),
        };
        table.write_identifiers(handles)?;
        for (index, record) in table.records.iter().enumerate() {
            let offset = layout.hit_record_offset(index as u32) + layout.handle_size as u64;
            table.buffer.write_pod(offset, record)?;
        }

        log::debug!(
            "shader table '{}': {} miss, {} hit records, {} bytes",
            label.as_ref(),
            miss_count,
            records.len(),
            layout.total_size
        );
        Ok(table)
    }

    /// 只改写 identifier，payload 保持不变
    ///
    /// pipeline 重建之后 identifier 会变化，但是 mesh 数据没有变化
    pub fn refresh_identifiers(&self, handles: &[u8]) -> GfxResult<()> {
        self.write_identifiers(handles)
    }

    fn write_identifiers(&self, handles: &[u8]) -> GfxResult<()> {
        let layout = &self.layout;
        let handle_size = layout.handle_size as usize;
        let handle = |group: u32| {
            let start = group as usize * handle_size;
            &handles[start..start + handle_size]
        };
        assert!(
            handles.len() >= handle_size * (1 + layout.miss_count as usize + 1),
            "shader group handles do not cover raygen, {} miss and one hit group",
            layout.miss_count
        );

        self.buffer.write(0, handle(0))?;
        for miss in 0..layout.miss_count {
            self.buffer.write(layout.miss_record_offset(miss), handle(1 + miss))?;
        }
        let hit_handle = handle(1 + layout.miss_count);
        for index in 0..layout.hit_count {
            self.buffer.write(layout.hit_record_offset(index), hit_handle)?;
        }
        Ok(())
    }
}

// getters
impl ShaderTable {
    #[inline]
    pub fn layout(&self) -> &ShaderTableLayout {
        &self.layout
    }
    #[inline]
    pub fn hit_record_count(&self) -> usize {
        self.records.len()
    }
    #[inline]
    pub fn records(&self) -> &[HitGroupRecord] {
        &self.records
    }
    #[inline]
    pub fn buffer(&self) -> &GpuBuffer {
        &self.buffer
    }
    #[inline]
    pub fn into_buffer(self) -> GpuBuffer {
        self.buffer
    }

    pub fn regions(&self) -> ShaderTableRegions {
        let base = self.buffer.device_address();
        let layout = &self.layout;
        ShaderTableRegions {
            raygen: StridedRegion {
                address: base,
                stride: layout.raygen_stride as u64,
                size: layout.raygen_stride as u64,
            },
            miss: StridedRegion {
                address: base + layout.miss_offset,
                stride: layout.miss_stride as u64,
                size: (layout.miss_stride * layout.miss_count) as u64,
            },
            hit: StridedRegion {
                address: base + layout.hit_offset,
                stride: layout.hit_stride as u64,
                size: (layout.hit_stride * layout.hit_count) as u64,
            },
            callable: StridedRegion::default(),
        }
    }

    /// 读回某个 hit record 的 identifier 和 payload，调试用
    pub fn read_hit_record(&self, index: usize) -> GfxResult<(Vec<u8>, HitGroupRecord)> {
        let offset = self.layout.hit_record_offset(index as u32);
        let handle_size = self.layout.handle_size as usize;
        let bytes = self
            .buffer
            .read_vec(offset, handle_size + std::mem::size_of::<HitGroupRecord>())?;
        Ok((bytes[..handle_size].to_vec(), bytemuck::pod_read_unaligned(&bytes[handle_size..])))
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{backend::mock::MockBackend, foundation::device::DeviceHandle};

    /// 与 mock 的 identifier 格式一致：serial + group
    fn handles(serial: u64, group_count: u32, handle_size: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; (group_count * handle_size) as usize];
        for (group, handle) in bytes.chunks_exact_mut(handle_size as usize).enumerate() {
            handle[0..8].copy_from_slice(&serial.to_le_bytes());
            handle[8..12].copy_from_slice(&(group as u32).to_le_bytes());
        }
        bytes
    }

    fn allocator() -> GpuMemoryAllocator {
        GpuMemoryAllocator::new(DeviceHandle::new(Rc::new(MockBackend::new())))
    }

    #[test]
    fn test_record_size() {
        assert_eq!(std::mem::size_of::<HitGroupRecord>(), 24);
    }

    #[test]
    fn test_layout_alignment() {
        let props = ShaderTableProperties {
            handle_size: 32,
            handle_alignment: 32,
            base_alignment: 64,
            max_recursion_depth: 1,
        };
        let layout = ShaderTableLayout::new(&props, 2, 3);
        assert_eq!(layout.raygen_stride, 32);
        assert_eq!(layout.miss_stride, 32);
        assert_eq!(layout.hit_stride, 64);
        assert_eq!(layout.miss_offset, 64);
        assert_eq!(layout.hit_offset, 128);
        assert_eq!(layout.total_size, 128 + 3 * 64);
    }

    #[test]
    fn test_regions_for_mesh_counts() {
        let allocator = allocator();
        let props = allocator.device().shader_table_properties();
        for mesh_count in [0usize, 1, 3] {
            let records = (0..mesh_count)
                .map(|i| HitGroupRecord::new(0x1000 * i as u64, 0x2000 * i as u64, i as u32))
                .collect::<Vec<_>>();
            let table = ShaderTable::build(&allocator, &handles(1, 3, props.handle_size), &props, 1, &records, "sbt")
                .unwrap();
            let regions = table.regions();

            assert_eq!(table.hit_record_count(), mesh_count);
            assert_eq!(regions.raygen.size, regions.raygen.stride);
            assert_eq!(regions.hit.size, regions.hit.stride * mesh_count as u64);
            for region in [regions.raygen, regions.miss, regions.hit] {
                assert_eq!(region.address % props.base_alignment as u64, 0);
                assert_eq!(region.stride % props.handle_alignment as u64, 0);
            }
            assert_eq!(regions.callable, StridedRegion::default());
        }
    }

    #[test]
    fn test_refresh_identifiers_keeps_payload() {
        let allocator = allocator();
        let props = allocator.device().shader_table_properties();
        let records = [HitGroupRecord::new(0xA0, 0xB0, 5), HitGroupRecord::new(0xA1, 0xB1, 0)];
        let table =
            ShaderTable::build(&allocator, &handles(1, 3, props.handle_size), &props, 1, &records, "sbt").unwrap();

        let (identifier, payload) = table.read_hit_record(1).unwrap();
        assert_eq!(&identifier[0..8], &1u64.to_le_bytes());
        assert_eq!(&identifier[8..12], &2u32.to_le_bytes());
        assert_eq!(payload, records[1]);

        table.refresh_identifiers(&handles(7, 3, props.handle_size)).unwrap();
        let (identifier, payload) = table.read_hit_record(1).unwrap();
        assert_eq!(&identifier[0..8], &7u64.to_le_bytes());
        assert_eq!(payload, records[1]);
        assert_eq!(table.read_hit_record(0).unwrap().1.material_index, 5);
    }
}

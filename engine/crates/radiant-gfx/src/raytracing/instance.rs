//! TLAS 中的 instance

use bitflags::bitflags;

bitflags! {
    /// 与 `VkGeometryInstanceFlagsKHR` / `D3D12_RAYTRACING_INSTANCE_FLAGS` 的取值一致
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InstanceFlags: u8 {
        const TRIANGLE_CULL_DISABLE = 1 << 0;
        const TRIANGLE_FRONT_COUNTERCLOCKWISE = 1 << 1;
        const FORCE_OPAQUE = 1 << 2;
        const FORCE_NO_OPAQUE = 1 << 3;
    }
}

/// 构建 TLAS 时的一个 instance
///
/// instance 的顺序必须与 shader table 中 hit record 的顺序一致：
/// `hit_group_offset` 是该 mesh 之前所有 hit record 的数量
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceDescriptor {
    pub blas_address: u64,
    pub transform: glam::Mat4,
    pub mask: u8,
    /// 只有低 24 位有效
    pub hit_group_offset: u32,
    /// 只有低 24 位有效，shader 中的 InstanceID()
    pub instance_id: u32,
    pub flags: InstanceFlags,
}

impl InstanceDescriptor {
    pub const MAX_24: u32 = (1 << 24) - 1;

    /// 打包成 GPU 上的 64 字节结构
    pub fn to_gpu(&self) -> GpuInstanceRecord {
        debug_assert!(self.instance_id <= Self::MAX_24, "instance id {} exceeds 24 bits", self.instance_id);
        debug_assert!(
            self.hit_group_offset <= Self::MAX_24,
            "hit group offset {} exceeds 24 bits",
            self.hit_group_offset
        );

        GpuInstanceRecord {
            transform: rt_transform(&self.transform),
            instance_custom_index_and_mask: (self.instance_id & Self::MAX_24) | ((self.mask as u32) << 24),
            sbt_offset_and_flags: (self.hit_group_offset & Self::MAX_24) | ((self.flags.bits() as u32) << 24),
            blas_address: self.blas_address,
        }
    }
}

/// 与 `VkAccelerationStructureInstanceKHR` 的内存布局一致
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuInstanceRecord {
    pub transform: [f32; 12],
    pub instance_custom_index_and_mask: u32,
    pub sbt_offset_and_flags: u32,
    pub blas_address: u64,
}

/// 3x4 的 row-major 矩阵，丢弃最后一行
pub fn rt_transform(trans: &glam::Mat4) -> [f32; 12] {
    let c1 = &trans.x_axis;
    let c2 = &trans.y_axis;
    let c3 = &trans.z_axis;
    let c4 = &trans.w_axis;

    [
        c1.x, c2.x, c3.x, c4.x, // row 1
        c1.y, c2.y, c3.y, c4.y, // row 2
        c1.z, c2.z, c3.z, c4.z, // row 3
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        assert_eq!(std::mem::size_of::<GpuInstanceRecord>(), 64);
        assert_eq!(std::mem::offset_of!(GpuInstanceRecord, blas_address), 56);
    }

    #[test]
    fn test_packing() {
        let desc = InstanceDescriptor {
            blas_address: 0xABCD_0000,
            transform: glam::Mat4::from_translation(glam::vec3(1.0, 2.0, 3.0)),
            mask: 0xFF,
            hit_group_offset: 7,
            instance_id: 5,
            flags: InstanceFlags::TRIANGLE_CULL_DISABLE,
        };
        let record = desc.to_gpu();

        assert_eq!(record.instance_custom_index_and_mask, 0xFF00_0005);
        assert_eq!(record.sbt_offset_and_flags, 0x0100_0007);
        assert_eq!(record.blas_address, 0xABCD_0000);
        // 平移在每行的最后一列
        assert_eq!([record.transform[3], record.transform[7], record.transform[11]], [1.0, 2.0, 3.0]);
        assert_eq!([record.transform[0], record.transform[5], record.transform[10]], [1.0, 1.0, 1.0]);
    }
}

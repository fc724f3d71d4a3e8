use itertools::Itertools;

use crate::{
    backend::types::{AsBuildDesc, AsBuildFlags, AsBuildMode, AsGeometry, AsKind, BufferUsage, MemoryKind},
    commands::gfx_command::BarrierScope,
    error::{GfxError, GfxResult},
    raytracing::{
        acceleration::AccelerationStructure,
        instance::{GpuInstanceRecord, InstanceDescriptor},
    },
    render_context::RenderContext,
    resources::buffer::GpuBuffer,
};

/// 顶层加速结构
///
/// 构建时带有 ALLOW_UPDATE，instance 的数量不变时可以 refit
pub struct Tlas {
    accel: AccelerationStructure,
    /// CPU 可写，refit 时原地更新
    instance_buffer: GpuBuffer,
    /// 同时满足 build 和 update 的尺寸
    scratch: GpuBuffer,
    instance_count: usize,
    /// 最近一次 build 或者 update 的 FenceValue
    last_build: u64,
    label: String,
}

// new & init
impl Tlas {
    const FLAGS: AsBuildFlags = AsBuildFlags::ALLOW_UPDATE.union(AsBuildFlags::PREFER_FAST_TRACE);

    /// 异步构建，提交后不等待
    ///
    /// 提交的 FenceValue 记录在 `last_build`，之后在同一队列上的命令可以直接使用
    pub fn build(ctx: &RenderContext, instances: &[InstanceDescriptor], label: impl AsRef<str>) -> GfxResult<Self> {
        let _span = radiant_crate_tools::profile_span!("Tlas::build");
        let label = label.as_ref().to_string();

        let records = instances.iter().map(InstanceDescriptor::to_gpu).collect_vec();
        let instance_buffer = ctx.allocator().create_buffer(
            std::mem::size_of_val(records.as_slice()) as u64,
            BufferUsage::ACCELERATION_STRUCTURE_INPUT,
            MemoryKind::Upload,
            format!("{}-instances", label),
        )?;
        instance_buffer.write_slice(0, &records)?;

        let desc = Self::build_desc(&instance_buffer, instances.len());
        let sizes = ctx.device().backend().acceleration_structure_sizes(&desc);
        let accel = AccelerationStructure::new(ctx.allocator(), AsKind::TopLevel, sizes.result_size, &label)?;
        let scratch = ctx.allocator().create_buffer_with_alignment(
            sizes.build_scratch_size.max(sizes.update_scratch_size),
            BufferUsage::STORAGE,
            MemoryKind::DeviceLocal,
            Some(ctx.device().capabilities().scratch_alignment),
            format!("{}-scratch", label),
        )?;

        let mut recorder = ctx.queue().acquire_recorder(format!("build-{}", label))?;
        recorder.build_acceleration_structure(desc, AsBuildMode::Build, accel.handle(), None, scratch.device_address());
        recorder.memory_barrier(BarrierScope::AccelerationStructure);
        let last_build = ctx.queue().execute(recorder)?;

        log::debug!("tlas '{}' built with {} instances", label, instances.len());
        Ok(Self {
            accel,
            instance_buffer,
            scratch,
            instance_count: instances.len(),
            last_build,
            label,
        })
    }

    fn build_desc(instance_buffer: &GpuBuffer, count: usize) -> AsBuildDesc {
        AsBuildDesc {
            flags: Self::FLAGS,
            geometry: AsGeometry::Instances {
                address: instance_buffer.device_address(),
                count: count as u32,
            },
        }
    }
}

// update
impl Tlas {
    /// 只更新 instance 的变换，原地 refit
    ///
    /// 图形队列上之前提交的帧可能还在 trace 这个加速结构。refit 之前录制一个
    /// `AccelerationStructureRefit` barrier，让这些读取先于 refit 的写入完成，CPU 不需要等待。
    ///
    /// instance 的数量变化时返回 `InstanceCountMismatch`，需要重新 build
    pub fn update(&mut self, ctx: &RenderContext, instances: &[InstanceDescriptor]) -> GfxResult<u64> {
        let _span = radiant_crate_tools::profile_span!("Tlas::update");
        if instances.len() != self.instance_count {
            return Err(GfxError::InstanceCountMismatch {
                label: self.label.clone(),
                expected: self.instance_count,
                actual: instances.len(),
            });
        }

        // 上一次构建可能还在读取 instance buffer
        ctx.queue().wait_for(self.last_build)?;
        let records = instances.iter().map(InstanceDescriptor::to_gpu).collect_vec();
        self.instance_buffer.write_slice(0, &records)?;

        let desc = Self::build_desc(&self.instance_buffer, instances.len());
        let mut recorder = ctx.queue().acquire_recorder(format!("refit-{}", self.label))?;
        recorder.memory_barrier(BarrierScope::AccelerationStructureRefit);
        recorder.build_acceleration_structure(
            desc,
            AsBuildMode::Update,
            self.accel.handle(),
            Some(self.accel.handle()),
            self.scratch.device_address(),
        );
        recorder.memory_barrier(BarrierScope::AccelerationStructure);
        self.last_build = ctx.queue().execute(recorder)?;
        Ok(self.last_build)
    }
}

// getters
impl Tlas {
    #[inline]
    pub fn device_address(&self) -> u64 {
        self.accel.device_address()
    }
    #[inline]
    pub fn accel(&self) -> &AccelerationStructure {
        &self.accel
    }
    #[inline]
    pub fn instance_count(&self) -> usize {
        self.instance_count
    }
    #[inline]
    pub fn last_build(&self) -> u64 {
        self.last_build
    }
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// 读回当前的 instance 数据，调试用
    pub fn read_instances(&self) -> GfxResult<Vec<GpuInstanceRecord>> {
        let bytes = self
            .instance_buffer
            .read_vec(0, self.instance_count * std::mem::size_of::<GpuInstanceRecord>())?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use std::{rc::Rc, time::Duration};

    use super::*;
    use crate::{
        backend::mock::MockBackend, commands::gfx_command::GfxCommand, config::GfxConfig,
        raytracing::instance::InstanceFlags,
    };

    fn instances(count: usize, offset_x: f32) -> Vec<InstanceDescriptor> {
        (0..count)
            .map(|i| InstanceDescriptor {
                blas_address: 0x10_0000 + i as u64 * 0x100,
                transform: glam::Mat4::from_translation(glam::vec3(offset_x + i as f32, 0.0, 0.0)),
                mask: 0xFF,
                hit_group_offset: i as u32,
                instance_id: i as u32,
                flags: InstanceFlags::TRIANGLE_CULL_DISABLE,
            })
            .collect()
    }

    #[test]
    fn test_build_does_not_block() {
        let backend = Rc::new(MockBackend::with_latency(Duration::from_millis(30)));
        let ctx = RenderContext::new(backend.clone(), GfxConfig::default()).unwrap();

        let tlas = Tlas::build(&ctx, &instances(3, 0.0), "scene").unwrap();
        assert_eq!(tlas.instance_count(), 3);
        assert!(!ctx.queue().is_complete(tlas.last_build()));
        assert_eq!(backend.accel_build_counts(tlas.accel().handle()), (1, 0));
    }

    #[test]
    fn test_refit_keeps_structure() {
        let backend = Rc::new(MockBackend::with_latency(Duration::from_millis(5)));
        let ctx = RenderContext::new(backend.clone(), GfxConfig::default()).unwrap();

        let mut tlas = Tlas::build(&ctx, &instances(2, 0.0), "scene").unwrap();
        let address = tlas.device_address();
        let first = tlas.last_build();

        let second = tlas.update(&ctx, &instances(2, 10.0)).unwrap();
        assert!(second > first);
        assert!(ctx.queue().is_complete(first));
        assert_eq!(tlas.device_address(), address);
        assert_eq!(backend.accel_build_counts(tlas.accel().handle()), (1, 1));

        let records = tlas.read_instances().unwrap();
        assert_eq!(records[1].transform[3], 11.0);
    }

    #[test]
    fn test_refit_waits_for_earlier_reads() {
        let backend = Rc::new(MockBackend::new());
        let ctx = RenderContext::new(backend.clone(), GfxConfig::default()).unwrap();
        let mut tlas = Tlas::build(&ctx, &instances(2, 0.0), "scene").unwrap();
        tlas.update(&ctx, &instances(2, 1.0)).unwrap();

        let is_refit = |command: &GfxCommand| {
            matches!(
                command,
                GfxCommand::BuildAccelerationStructure {
                    mode: AsBuildMode::Update,
                    ..
                }
            )
        };
        let submissions = backend.submissions();
        let submission = submissions
            .iter()
            .find(|submission| submission.commands.iter().any(is_refit))
            .unwrap();
        let barrier = submission
            .commands
            .iter()
            .position(|command| *command == GfxCommand::MemoryBarrier(BarrierScope::AccelerationStructureRefit))
            .unwrap();
        let build = submission.commands.iter().position(is_refit).unwrap();
        assert!(barrier < build);
    }

    #[test]
    fn test_refit_with_other_count_rejected() {
        let ctx = RenderContext::new(Rc::new(MockBackend::new()), GfxConfig::default()).unwrap();
        let mut tlas = Tlas::build(&ctx, &instances(2, 0.0), "scene").unwrap();
        assert!(matches!(
            tlas.update(&ctx, &instances(3, 0.0)),
            Err(GfxError::InstanceCountMismatch {
                expected: 2,
                actual: 3,
                ..
            })
        ));
    }
}

use crate::{
    backend::types::{
        AsBuildDesc, AsBuildFlags, AsBuildMode, AsGeometry, AsKind, BufferUsage, IndexFormat, MemoryKind,
        TriangleGeometry, VertexFormat,
    },
    commands::gfx_command::BarrierScope,
    error::{GfxError, GfxResult},
    raytracing::acceleration::AccelerationStructure,
    render_context::RenderContext,
};

/// BLAS 中的一个 mesh
///
/// 构建进 BLAS 之后就不再改变
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryRecord {
    pub vertex_address: u64,
    pub vertex_count: u32,
    pub vertex_stride: u64,
    pub vertex_format: VertexFormat,
    pub index_address: u64,
    pub index_count: u32,
    pub index_format: IndexFormat,
    /// 该 mesh 在 TLAS 中的 instance 的变换
    pub transform: glam::Mat4,
    /// 小于 0 表示没有材质
    pub material_index: i32,
}

impl GeometryRecord {
    #[inline]
    pub fn primitive_count(&self) -> u32 {
        self.index_count / 3
    }

    fn triangles(&self) -> TriangleGeometry {
        TriangleGeometry {
            vertex_address: self.vertex_address,
            vertex_count: self.vertex_count,
            vertex_stride: self.vertex_stride,
            vertex_format: self.vertex_format,
            index_address: self.index_address,
            index_count: self.index_count,
            index_format: self.index_format,
            opaque: true,
        }
    }
}

/// 底层加速结构
pub struct Blas {
    accel: AccelerationStructure,
    geometry_count: usize,
    primitive_count: u32,
}

// new & init
impl Blas {
    /// 同步构建 blas
    ///
    /// # 构建过程
    ///
    /// 1. 查询构建 blas 所需的尺寸
    /// 2. 创建 blas 以及 scratch buffer
    /// 3. 构建，然后插入加速结构的 barrier
    /// 4. 提交并等待完成，scratch buffer 随后释放
    pub fn build(ctx: &RenderContext, geometries: &[GeometryRecord], label: impl AsRef<str>) -> GfxResult<Self> {
        let _span = radiant_crate_tools::profile_span!("Blas::build");
        let label = label.as_ref();
        if geometries.is_empty() {
            return Err(GfxError::creation("blas", label, "no geometry"));
        }

        let desc = AsBuildDesc {
            flags: AsBuildFlags::PREFER_FAST_TRACE,
            geometry: AsGeometry::Triangles(geometries.iter().map(GeometryRecord::triangles).collect()),
        };
        let primitive_count = desc.primitive_count();
        let sizes = ctx.device().backend().acceleration_structure_sizes(&desc);

        let accel = AccelerationStructure::new(ctx.allocator(), AsKind::BottomLevel, sizes.result_size, label)?;
        let scratch = ctx.allocator().create_buffer_with_alignment(
            sizes.build_scratch_size,
            BufferUsage::STORAGE,
            MemoryKind::DeviceLocal,
            Some(ctx.device().capabilities().scratch_alignment),
            format!("{}-scratch", label),
        )?;

        // 顶点和索引可能还在上传队列中
        ctx.queue().synchronize_with(ctx.upload().queue());
        ctx.queue().one_time_exec("build-blas", |cmd| {
            cmd.build_acceleration_structure(desc, AsBuildMode::Build, accel.handle(), None, scratch.device_address());
            cmd.memory_barrier(BarrierScope::AccelerationStructure);
        })?;

        log::debug!("blas '{}' built: {} geometries, {} triangles", label, geometries.len(), primitive_count);
        Ok(Self {
            accel,
            geometry_count: geometries.len(),
            primitive_count,
        })
    }
}

// getters
impl Blas {
    #[inline]
    pub fn device_address(&self) -> u64 {
        self.accel.device_address()
    }
    #[inline]
    pub fn accel(&self) -> &AccelerationStructure {
        &self.accel
    }
    #[inline]
    pub fn geometry_count(&self) -> usize {
        self.geometry_count
    }
    #[inline]
    pub fn primitive_count(&self) -> u32 {
        self.primitive_count
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{backend::mock::MockBackend, config::GfxConfig};

    fn triangle_record(index_count: u32) -> GeometryRecord {
        GeometryRecord {
            vertex_address: 0x1000,
            vertex_count: 3,
            vertex_stride: 12,
            vertex_format: VertexFormat::Float32x3,
            index_address: 0x2000,
            index_count,
            index_format: IndexFormat::U32,
            transform: glam::Mat4::IDENTITY,
            material_index: -1,
        }
    }

    #[test]
    fn test_build_is_synchronous() {
        let backend = Rc::new(MockBackend::with_latency(std::time::Duration::from_millis(5)));
        let ctx = RenderContext::new(backend.clone(), GfxConfig::default()).unwrap();

        let blas = Blas::build(&ctx, &[triangle_record(6), triangle_record(9)], "mesh").unwrap();
        assert_eq!(blas.primitive_count(), 5);
        assert_eq!(blas.geometry_count(), 2);
        assert_ne!(blas.device_address(), 0);
        assert!(ctx.queue().is_complete(ctx.queue().last_signaled()));
        assert_eq!(backend.accel_build_counts(blas.accel().handle()), (1, 0));
    }

    #[test]
    fn test_empty_geometry_rejected() {
        let ctx = RenderContext::new(Rc::new(MockBackend::new()), GfxConfig::default()).unwrap();
        assert!(matches!(Blas::build(&ctx, &[], "empty"), Err(GfxError::Creation { .. })));
    }

    #[test]
    fn test_drop_releases_structure() {
        let backend = Rc::new(MockBackend::new());
        let ctx = RenderContext::new(backend.clone(), GfxConfig::default()).unwrap();
        let blas = Blas::build(&ctx, &[triangle_record(3)], "mesh").unwrap();
        assert_eq!(backend.live_accel_count(), 1);
        drop(blas);
        assert_eq!(backend.live_accel_count(), 0);
    }
}

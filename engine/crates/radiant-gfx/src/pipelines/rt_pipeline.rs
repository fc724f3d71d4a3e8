use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use crate::{
    backend::types::{HitGroupDesc, RtPipelineDesc},
    commands::command_queue::ExecutionQueue,
    error::{GfxError, GfxResult, ShaderCompileError},
    foundation::device::DeviceHandle,
    pipelines::{
        binding_layout::PipelineResourceBinding,
        shader::{ShaderBinary, ShaderCompiler, ShaderProgram},
        shader_table::{HitGroupRecord, ShaderTable},
    },
    render_context::RenderContext,
    resources::{allocator::GpuMemoryAllocator, handles::{BindingLayoutHandle, PipelineHandle}},
};

/// 光追管线使用的 shader 以及 group
#[derive(Debug, Clone)]
pub struct RtShaderSet {
    pub label: String,
    /// 包含所有 entry point 的 shader library
    pub shader_path: PathBuf,
    pub raygen: String,
    pub miss: Vec<String>,
    pub hit_groups: Vec<HitGroupDesc>,
    pub max_recursion_depth: u32,
}

impl RtShaderSet {
    fn entry_points(&self) -> Vec<String> {
        let hit_entries = self.hit_groups.iter().flat_map(|group| {
            [&group.closest_hit, &group.any_hit, &group.intersection]
                .into_iter()
                .flatten()
                .cloned()
        });
        std::iter::once(self.raygen.clone())
            .chain(self.miss.iter().cloned())
            .chain(hit_entries)
            .collect()
    }

    #[inline]
    fn group_count(&self) -> u32 {
        1 + self.miss.len() as u32 + self.hit_groups.len() as u32
    }
}

/// 可以热重载的光追管线，以及它的 shader table
///
/// shader 文件变化之后重新编译并重建管线；编译或者管线创建失败时保留之前的管线，
/// 并记录错误，供 UI 显示
pub struct HotReloadablePipeline {
    pipeline: PipelineHandle,
    program: ShaderProgram,
    shader_table: ShaderTable,
    shaders: RtShaderSet,
    layout: BindingLayoutHandle,

    reload_interval: Duration,
    last_check: Instant,
    last_reload_succeeded: bool,
    /// 每次成功重建 +1
    generation: u64,

    allocator: GpuMemoryAllocator,
    device: DeviceHandle,
}

// new & init
impl HotReloadablePipeline {
    /// 初次编译失败属于致命错误，直接返回
    pub fn new(
        ctx: &RenderContext,
        binding: &PipelineResourceBinding,
        shaders: RtShaderSet,
        compiler: &dyn ShaderCompiler,
        records: &[HitGroupRecord],
    ) -> GfxResult<Self> {
        let _span = radiant_crate_tools::profile_span!("HotReloadablePipeline::new");
        let device = ctx.device().clone();
        let max_depth = device.shader_table_properties().max_recursion_depth;
        if shaders.max_recursion_depth > max_depth {
            return Err(GfxError::Unsupported(format!(
                "pipeline '{}' needs recursion depth {}, device allows {}",
                shaders.label, shaders.max_recursion_depth, max_depth
            )));
        }

        let program = ShaderProgram::new(&shaders.shader_path, shaders.entry_points(), compiler)?;
        let layout = binding.layout();
        let (pipeline, handles) = Self::create_pipeline(&device, layout, &shaders, program.binary())?;
        let shader_table = match ShaderTable::build(
            ctx.allocator(),
            &handles,
            &device.shader_table_properties(),
            shaders.miss.len() as u32,
            records,
            &shaders.label,
        ) {
            Ok(table) => table,
            Err(err) => {
                device.backend().destroy_pipeline(pipeline);
                return Err(err);
            }
        };

        log::info!("rt pipeline '{}' created", shaders.label);
        Ok(Self {
            pipeline,
            program,
            shader_table,
            shaders,
            layout,
            reload_interval: ctx.config().reload_interval(),
            last_check: Instant::now(),
            last_reload_succeeded: true,
            generation: 0,
            allocator: ctx.allocator().clone(),
            device,
        })
    }

    fn create_pipeline(
        device: &DeviceHandle,
        layout: BindingLayoutHandle,
        shaders: &RtShaderSet,
        binary: &ShaderBinary,
    ) -> GfxResult<(PipelineHandle, Vec<u8>)> {
        let pipeline = device.backend().create_rt_pipeline(&RtPipelineDesc {
            label: &shaders.label,
            layout,
            binary,
            raygen: &shaders.raygen,
            miss: &shaders.miss,
            hit_groups: &shaders.hit_groups,
            max_recursion_depth: shaders.max_recursion_depth,
        })?;

        match device.backend().shader_group_handles(pipeline, shaders.group_count()) {
            Ok(handles) => Ok((pipeline, handles)),
            Err(err) => {
                device.backend().destroy_pipeline(pipeline);
                Err(err)
            }
        }
    }
}

// getters
impl HotReloadablePipeline {
    /// 当前可用的管线
    #[inline]
    pub fn pipeline(&self) -> PipelineHandle {
        self.pipeline
    }
    #[inline]
    pub fn shader_table(&self) -> &ShaderTable {
        &self.shader_table
    }
    #[inline]
    pub fn layout(&self) -> BindingLayoutHandle {
        self.layout
    }
    #[inline]
    pub fn last_compile_error(&self) -> Option<&ShaderCompileError> {
        self.program.last_error()
    }
    #[inline]
    pub fn last_reload_succeeded(&self) -> bool {
        self.last_reload_succeeded
    }
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }
    #[inline]
    pub fn shader_binary(&self) -> &ShaderBinary {
        self.program.binary()
    }
}

// 热重载
impl HotReloadablePipeline {
    /// 距离上一次检查超过 reload_interval，并且 shader 文件发生了变化
    pub fn needs_reload(&mut self) -> bool {
        if self.last_check.elapsed() < self.reload_interval {
            return false;
        }
        self.last_check = Instant::now();
        self.program.needs_reload()
    }

    /// 重新编译并重建管线，返回是否发生了重建
    ///
    /// 调用者需要保证旧的管线以及 shader table 已经不再被 GPU 使用。
    /// 编译失败或者管线创建失败时保留旧的管线；只有 DeviceLost 会作为错误返回
    pub fn reload(&mut self, compiler: &dyn ShaderCompiler) -> GfxResult<bool> {
        let _span = radiant_crate_tools::profile_span!("HotReloadablePipeline::reload");
        let previous = self.program.binary().clone();
        if !self.program.reload(compiler) {
            self.last_reload_succeeded = false;
            return Ok(false);
        }

        let (pipeline, handles) =
            match Self::create_pipeline(&self.device, self.layout, &self.shaders, self.program.binary()) {
                Ok(created) => created,
                Err(GfxError::DeviceLost(details)) => return Err(GfxError::DeviceLost(details)),
                Err(err) => {
                    let err = ShaderCompileError::new(self.program.path(), err.to_string());
                    self.program.reject(previous, err);
                    self.last_reload_succeeded = false;
                    return Ok(false);
                }
            };

        // mesh 数据没有变化，只需要更新 identifier
        if let Err(err) = self.shader_table.refresh_identifiers(&handles) {
            self.device.backend().destroy_pipeline(pipeline);
            return Err(err);
        }
        self.device.backend().destroy_pipeline(self.pipeline);
        self.pipeline = pipeline;
        self.generation += 1;
        self.last_reload_succeeded = true;
        log::info!("rt pipeline '{}' rebuilt, generation {}", self.shaders.label, self.generation);
        Ok(true)
    }

    /// 需要时先 flush 队列，然后重建。返回是否发生了重建
    pub fn check_hot_reload(&mut self, queue: &ExecutionQueue, compiler: &dyn ShaderCompiler) -> GfxResult<bool> {
        if !self.needs_reload() {
            return Ok(false);
        }
        queue.flush()?;
        self.reload(compiler)
    }

    /// instance 的集合变化之后重建 shader table
    ///
    /// 返回旧的 shader table，GPU 可能还在使用它，由调用者延迟释放
    pub fn rebuild_shader_table(&mut self, records: &[HitGroupRecord]) -> GfxResult<ShaderTable> {
        let handles = self.device.backend().shader_group_handles(self.pipeline, self.shaders.group_count())?;
        let table = ShaderTable::build(
            &self.allocator,
            &handles,
            &self.device.shader_table_properties(),
            self.shaders.miss.len() as u32,
            records,
            &self.shaders.label,
        )?;
        Ok(std::mem::replace(&mut self.shader_table, table))
    }
}

impl Drop for HotReloadablePipeline {
    fn drop(&mut self) {
        self.device.backend().destroy_pipeline(self.pipeline);
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, rc::Rc};

    use super::*;
    use crate::{
        backend::mock::MockBackend,
        config::GfxConfig,
        pipelines::{
            binding_layout::BindingKind,
            shader::{
                SpirvFileCompiler,
                test_utils::{spirv_bytes, write_file},
            },
        },
    };

    fn shaders(path: &Path) -> RtShaderSet {
        RtShaderSet {
            label: "rt".to_string(),
            shader_path: path.to_path_buf(),
            raygen: "RayGen".to_string(),
            miss: vec!["Miss".to_string()],
            hit_groups: vec![HitGroupDesc {
                closest_hit: Some("ClosestHit".to_string()),
                any_hit: None,
                intersection: None,
            }],
            max_recursion_depth: 1,
        }
    }

    fn context(backend: Rc<MockBackend>, reload_interval_ms: u64) -> RenderContext {
        let config = GfxConfig {
            reload_interval_ms,
            ..Default::default()
        };
        RenderContext::new(backend, config).unwrap()
    }

    fn binding(ctx: &RenderContext) -> PipelineResourceBinding {
        let mut binding = PipelineResourceBinding::new("rt");
        binding.add_direct_binding(BindingKind::ShaderResource, 0, 0, "sceneBVH");
        binding.build(ctx.device(), None).unwrap();
        binding
    }

    #[test]
    fn test_entry_points() {
        let set = shaders(Path::new("rt.spv"));
        assert_eq!(set.entry_points(), vec!["RayGen", "Miss", "ClosestHit"]);
        assert_eq!(set.group_count(), 3);
    }

    #[test]
    fn test_initial_compile_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt.spv");
        write_file(&path, b"garbage!", 0);

        let ctx = context(Rc::new(MockBackend::new()), 0);
        let binding = binding(&ctx);
        let result = HotReloadablePipeline::new(&ctx, &binding, shaders(&path), &SpirvFileCompiler, &[]);
        assert!(matches!(result, Err(GfxError::ShaderCompile(_))));
    }

    #[test]
    fn test_failed_reload_preserves_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt.spv");
        write_file(&path, &spirv_bytes(1), 0);

        let backend = Rc::new(MockBackend::new());
        let ctx = context(backend.clone(), 0);
        let binding = binding(&ctx);
        let records = [HitGroupRecord::new(0x10, 0x20, 3)];
        let mut pipeline =
            HotReloadablePipeline::new(&ctx, &binding, shaders(&path), &SpirvFileCompiler, &records).unwrap();
        let original = pipeline.pipeline();
        let original_binary = pipeline.shader_binary().clone();

        write_file(&path, b"broken shader", 10);
        assert!(!pipeline.check_hot_reload(ctx.queue(), &SpirvFileCompiler).unwrap());
        assert_eq!(pipeline.pipeline(), original);
        assert_eq!(pipeline.shader_binary(), &original_binary);
        assert!(!pipeline.last_reload_succeeded());
        assert!(!pipeline.last_compile_error().unwrap().message.is_empty());

        write_file(&path, &spirv_bytes(2), 20);
        assert!(pipeline.check_hot_reload(ctx.queue(), &SpirvFileCompiler).unwrap());
        assert_ne!(pipeline.pipeline(), original);
        assert_ne!(pipeline.shader_binary(), &original_binary);
        assert!(pipeline.last_reload_succeeded());
        assert!(pipeline.last_compile_error().is_none());
        assert_eq!(pipeline.generation(), 1);
        assert_eq!(backend.live_pipeline_count(), 1);

        // identifier 已经更新为新管线的序号，payload 不变
        let (identifier, payload) = pipeline.shader_table().read_hit_record(0).unwrap();
        assert_eq!(&identifier[0..8], &2u64.to_le_bytes());
        assert_eq!(payload, records[0]);
    }

    #[test]
    fn test_pipeline_creation_failure_counts_as_compile_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt.spv");
        write_file(&path, &spirv_bytes(1), 0);

        let backend = Rc::new(MockBackend::new());
        let ctx = context(backend.clone(), 0);
        let binding = binding(&ctx);
        let mut pipeline =
            HotReloadablePipeline::new(&ctx, &binding, shaders(&path), &SpirvFileCompiler, &[]).unwrap();
        let original = pipeline.pipeline();
        let original_binary = pipeline.shader_binary().clone();

        write_file(&path, &spirv_bytes(2), 10);
        backend.fail_next_pipeline();
        assert!(!pipeline.reload(&SpirvFileCompiler).unwrap());
        assert_eq!(pipeline.pipeline(), original);
        assert_eq!(pipeline.shader_binary(), &original_binary);
        assert!(pipeline.last_compile_error().is_some());
        assert_eq!(pipeline.generation(), 0);
    }

    #[test]
    fn test_reload_check_is_throttled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt.spv");
        write_file(&path, &spirv_bytes(1), 0);

        let ctx = context(Rc::new(MockBackend::new()), 500);
        let binding = binding(&ctx);
        let mut pipeline =
            HotReloadablePipeline::new(&ctx, &binding, shaders(&path), &SpirvFileCompiler, &[]).unwrap();

        write_file(&path, &spirv_bytes(2), 10);
        assert!(!pipeline.needs_reload());
    }

    #[test]
    fn test_rebuild_shader_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt.spv");
        write_file(&path, &spirv_bytes(1), 0);

        let ctx = context(Rc::new(MockBackend::new()), 0);
        let binding = binding(&ctx);
        let mut pipeline =
            HotReloadablePipeline::new(&ctx, &binding, shaders(&path), &SpirvFileCompiler, &[]).unwrap();
        assert_eq!(pipeline.shader_table().hit_record_count(), 0);

        let records = vec![HitGroupRecord::default(); 3];
        let old = pipeline.rebuild_shader_table(&records).unwrap();
        assert_eq!(old.hit_record_count(), 0);
        assert_eq!(pipeline.shader_table().hit_record_count(), 3);
    }
}

use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use crate::{
    backend::types::ComputePipelineDesc,
    commands::{command_queue::ExecutionQueue, command_recorder::CommandRecorder},
    error::{GfxError, GfxResult, ShaderCompileError},
    foundation::device::DeviceHandle,
    pipelines::{
        binding_layout::PipelineResourceBinding,
        shader::{ShaderBinary, ShaderCompiler, ShaderProgram},
    },
    render_context::RenderContext,
    resources::handles::{BindingLayoutHandle, PipelineHandle},
};

#[derive(Debug, Clone)]
pub struct ComputeShader {
    pub label: String,
    pub shader_path: PathBuf,
    pub entry_point: String,
}

/// 可以热重载的 compute 管线，用于全屏的后处理
///
/// 与光追管线相同：重建失败时保留之前的管线
pub struct HotReloadableComputePipeline {
    pipeline: PipelineHandle,
    program: ShaderProgram,
    shader: ComputeShader,
    layout: BindingLayoutHandle,

    reload_interval: Duration,
    last_check: Instant,
    last_reload_succeeded: bool,
    generation: u64,

    device: DeviceHandle,
}

// new & init
impl HotReloadableComputePipeline {
    /// shader 中声明的 thread group 尺寸，`[numthreads(8, 8, 1)]`
    pub const GROUP_SIZE: u32 = 8;

    /// 初次编译失败属于致命错误
    pub fn new(
        ctx: &RenderContext,
        binding: &PipelineResourceBinding,
        shader: ComputeShader,
        compiler: &dyn ShaderCompiler,
    ) -> GfxResult<Self> {
        let _span = radiant_crate_tools::profile_span!("HotReloadableComputePipeline::new");
        let device = ctx.device().clone();
        let program = ShaderProgram::new(&shader.shader_path, vec![shader.entry_point.clone()], compiler)?;
        let layout = binding.layout();
        let pipeline = Self::create_pipeline(&device, layout, &shader, program.binary())?;

        log::info!("compute pipeline '{}' created", shader.label);
        Ok(Self {
            pipeline,
            program,
            shader,
            layout,
            reload_interval: ctx.config().reload_interval(),
            last_check: Instant::now(),
            last_reload_succeeded: true,
            generation: 0,
            device,
        })
    }

    fn create_pipeline(
        device: &DeviceHandle,
        layout: BindingLayoutHandle,
        shader: &ComputeShader,
        binary: &ShaderBinary,
    ) -> GfxResult<PipelineHandle> {
        device.backend().create_compute_pipeline(&ComputePipelineDesc {
            label: &shader.label,
            layout,
            binary,
            entry_point: &shader.entry_point,
        })
    }

    /// 覆盖 width x height 个像素所需的 thread group 数量
    #[inline]
    pub fn group_count(width: u32, height: u32) -> (u32, u32) {
        (width.div_ceil(Self::GROUP_SIZE), height.div_ceil(Self::GROUP_SIZE))
    }
}

// getters
impl HotReloadableComputePipeline {
    #[inline]
    pub fn pipeline(&self) -> PipelineHandle {
        self.pipeline
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
}

// 热重载
impl HotReloadableComputePipeline {
    pub fn needs_reload(&mut self) -> bool {
        if self.last_check.elapsed() < self.reload_interval {
            return false;
        }
        self.last_check = Instant::now();
        self.program.needs_reload()
    }

    /// 调用者需要保证旧的管线已经不再被 GPU 使用。只有 DeviceLost 会作为错误返回
    pub fn reload(&mut self, compiler: &dyn ShaderCompiler) -> GfxResult<bool> {
        let _span = radiant_crate_tools::profile_span!("HotReloadableComputePipeline::reload");
        let previous = self.program.binary().clone();
        if !self.program.reload(compiler) {
            self.last_reload_succeeded = false;
            return Ok(false);
        }

        let pipeline = match Self::create_pipeline(&self.device, self.layout, &self.shader, self.program.binary()) {
            Ok(pipeline) => pipeline,
            Err(GfxError::DeviceLost(details)) => return Err(GfxError::DeviceLost(details)),
            Err(err) => {
                let err = ShaderCompileError::new(self.program.path(), err.to_string());
                self.program.reject(previous, err);
                self.last_reload_succeeded = false;
                return Ok(false);
            }
        };

        self.device.backend().destroy_pipeline(self.pipeline);
        self.pipeline = pipeline;
        self.generation += 1;
        self.last_reload_succeeded = true;
        log::info!("compute pipeline '{}' rebuilt, generation {}", self.shader.label, self.generation);
        Ok(true)
    }

    /// 需要时先 flush 队列，然后重建
    pub fn check_hot_reload(&mut self, queue: &ExecutionQueue, compiler: &dyn ShaderCompiler) -> GfxResult<bool> {
        if !self.needs_reload() {
            return Ok(false);
        }
        queue.flush()?;
        self.reload(compiler)
    }
}

// draw
impl HotReloadableComputePipeline {
    /// 管线以及 binding 需要已经绑定
    pub fn dispatch_2d(&self, cmd: &mut CommandRecorder, width: u32, height: u32) {
        let (x, y) = Self::group_count(width, height);
        cmd.dispatch(x, y, 1);
    }
}

impl Drop for HotReloadableComputePipeline {
    fn drop(&mut self) {
        self.device.backend().destroy_pipeline(self.pipeline);
    }
}

use std::path::Path;

use radiant_gfx::{
    backend::types::{BufferUsage, HitGroupDesc, TextureFormat},
    commands::{frame_ring::FrameRing, gfx_command::TextureState},
    error::{GfxResult, ShaderCompileError},
    pipelines::{
        binding_layout::{BindingKind, PipelineResourceBinding, SamplerAddressMode, SamplerFilter, StaticSamplerDesc},
        compute_pipeline::{ComputeShader, HotReloadableComputePipeline},
        rt_pipeline::{HotReloadablePipeline, RtShaderSet},
        shader::ShaderCompiler,
    },
    render_context::RenderContext,
    resources::{per_frame_buffer::PerFrameBuffer, release_queue::ReleaseQueue},
    swapchain::swap_surface::SwapSurface,
};
use radiant_scene::{
    components::model::ModelData,
    error::SceneResult,
    scene::{Scene, TlasRefresh},
};

use crate::{
    camera::{Camera, CameraData},
    output_texture::OutputTexture,
};

/// 光追渲染器
///
/// 光追把结果累积到 HDR 的 accumulation texture，后处理 pass 再 tonemap 到 output，
/// 最后复制到 back buffer。
/// 持有 RenderContext；所有 GPU 对象都在 RenderContext 之前销毁
pub struct Renderer {
    pipeline: HotReloadablePipeline,
    binding: PipelineResourceBinding,
    post_pipeline: HotReloadableComputePipeline,
    post_binding: PipelineResourceBinding,
    compiler: Box<dyn ShaderCompiler>,

    frame_ring: FrameRing,
    camera_buffer: PerFrameBuffer<CameraData>,
    accumulation: OutputTexture,
    output: OutputTexture,
    scene: Scene,
    /// 被替换掉的 shader table
    release_queue: ReleaseQueue,

    camera: Camera,
    /// 上一帧使用的相机数据
    prev_camera: CameraData,
    /// 连续累积的帧数，场景、相机或者管线变化之后清零
    accumulation_count: u32,
    exposure: f32,

    ctx: RenderContext,
}

// new & init
impl Renderer {
    const ACCUMULATION_FORMAT: TextureFormat = TextureFormat::Rgba32Float;

    pub fn new(
        ctx: RenderContext,
        surface: &dyn SwapSurface,
        shader_path: &Path,
        tonemap_shader_path: &Path,
        compiler: Box<dyn ShaderCompiler>,
    ) -> GfxResult<Self> {
        let _span = radiant_crate_tools::profile_span!("Renderer::new");
        let slot_count = ctx.config().frames_in_flight;
        let heap = ctx.descriptor_table().heap();

        let mut binding = PipelineResourceBinding::new("rt");
        binding.add_table(BindingKind::UnorderedAccess, 1, 0, 0, "outputTexture"); // u0
        binding.add_direct_binding(BindingKind::ShaderResource, 0, 0, "sceneBVH"); // t0
        binding.add_direct_binding(BindingKind::ConstantBuffer, 0, 0, "camera"); // b0
        binding.add_table(BindingKind::ShaderResource, 1, 1, 0, "materials"); // t1
        binding.add_constants(2, 1, 0, "renderData"); // b1
        binding.build(ctx.device(), Some(heap))?;

        let post_binding = Self::post_process_binding(&ctx)?;

        let scene = Scene::new();
        let pipeline = HotReloadablePipeline::new(
            &ctx,
            &binding,
            Self::rt_shader_set(shader_path),
            compiler.as_ref(),
            &scene.hit_group_records(),
        )?;
        let post_pipeline = HotReloadableComputePipeline::new(
            &ctx,
            &post_binding,
            Self::tonemap_shader(tonemap_shader_path),
            compiler.as_ref(),
        )?;

        let frame_ring = FrameRing::new(ctx.queue(), slot_count)?;
        let camera_buffer = PerFrameBuffer::new(ctx.allocator(), slot_count, BufferUsage::UNIFORM, "camera")?;
        let (width, height) = surface.extent();
        let accumulation = OutputTexture::new_sampled(&ctx, width, height, Self::ACCUMULATION_FORMAT, "accumulation")?;
        let output = OutputTexture::new(&ctx, width, height, surface.format(), "output")?;

        let camera = Camera::new(glam::vec3(0.0, 1.0, 8.0));
        Ok(Self {
            pipeline,
            binding,
            post_pipeline,
            post_binding,
            compiler,
            frame_ring,
            camera_buffer,
            accumulation,
            output,
            scene,
            release_queue: ReleaseQueue::new(),
            prev_camera: camera.data(),
            camera,
            accumulation_count: 0,
            exposure: 1.0,
            ctx,
        })
    }

    /// 一个 raygen，一个 miss，所有 mesh 共用一个 hit group
    pub fn rt_shader_set(shader_path: &Path) -> RtShaderSet {
        RtShaderSet {
            label: "rt".to_string(),
            shader_path: shader_path.to_path_buf(),
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

    pub fn tonemap_shader(shader_path: &Path) -> ComputeShader {
        ComputeShader {
            label: "tonemap".to_string(),
            shader_path: shader_path.to_path_buf(),
            entry_point: "main".to_string(),
        }
    }

    fn post_process_binding(ctx: &RenderContext) -> GfxResult<PipelineResourceBinding> {
        let mut binding = PipelineResourceBinding::new("tonemap");
        binding.add_table(BindingKind::ShaderResource, 1, 0, 0, "inputTexture"); // t0
        binding.add_table(BindingKind::UnorderedAccess, 1, 0, 0, "outputTexture"); // u0
        // width, height, 累积的样本数, exposure
        binding.add_constants(4, 0, 0, "postProcess"); // b0
        binding.add_static_sampler(StaticSamplerDesc {
            slot: 0,
            space: 0,
            filter: SamplerFilter::Linear,
            address_mode: SamplerAddressMode::Repeat,
            max_anisotropy: 16,
        });
        binding.build(ctx.device(), Some(ctx.descriptor_table().heap()))?;
        Ok(binding)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(err) = self.ctx.queue().flush() {
            log::error!("failed to flush queue before destroying renderer: {}", err);
        }
        self.output.release(&self.ctx);
        self.accumulation.release(&self.ctx);
        self.release_queue.clear(&mut self.ctx.descriptor_table_mut());
        self.scene.release_all(&self.ctx);
    }
}

// getters
impl Renderer {
    #[inline]
    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }
    #[inline]
    pub fn scene(&self) -> &Scene {
        &self.scene
    }
    /// 修改 mesh 的变换之后，下一帧会 refit TLAS
    #[inline]
    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }
    #[inline]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }
    /// 相机的变化在下一帧开始时检测，累积会重新开始
    #[inline]
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }
    #[inline]
    pub fn pipeline(&self) -> &HotReloadablePipeline {
        &self.pipeline
    }
    #[inline]
    pub fn post_process_pipeline(&self) -> &HotReloadableComputePipeline {
        &self.post_pipeline
    }
    #[inline]
    pub fn accumulation(&self) -> &OutputTexture {
        &self.accumulation
    }
    #[inline]
    pub fn output(&self) -> &OutputTexture {
        &self.output
    }
    #[inline]
    pub fn camera_buffer(&self) -> &PerFrameBuffer<CameraData> {
        &self.camera_buffer
    }
    #[inline]
    pub fn accumulation_count(&self) -> u32 {
        self.accumulation_count
    }
    #[inline]
    pub fn exposure(&self) -> f32 {
        self.exposure
    }

    /// 已经提交的帧数
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_ring.frame_id()
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        self.frame_ring.frame_name()
    }
    #[inline]
    pub fn last_compile_error(&self) -> Option<&ShaderCompileError> {
        self.pipeline.last_compile_error()
    }
    #[inline]
    pub fn last_reload_succeeded(&self) -> bool {
        self.pipeline.last_reload_succeeded()
    }
    #[inline]
    pub fn post_process_compile_error(&self) -> Option<&ShaderCompileError> {
        self.post_pipeline.last_compile_error()
    }
}

// update
impl Renderer {
    /// 只影响 tonemap，不会重新开始累积
    #[inline]
    pub fn set_exposure(&mut self, exposure: f32) {
        self.exposure = exposure;
    }

    /// 加载 model 之后，instance 的集合发生了变化，需要重建 shader table
    pub fn load_model(&mut self, data: ModelData) -> SceneResult<usize> {
        let index = self.scene.load_model(&self.ctx, data)?;

        let old_table = self.pipeline.rebuild_shader_table(&self.scene.hit_group_records())?;
        self.release_queue.defer(old_table, self.ctx.queue().last_signaled());
        self.accumulation_count = 0;
        Ok(index)
    }

    /// 尺寸为 0 时（例如窗口最小化）不做任何事
    pub fn resize(&mut self, surface: &mut dyn SwapSurface, width: u32, height: u32) -> GfxResult<()> {
        if width == 0 || height == 0 || (width, height) == self.output.extent() {
            return Ok(());
        }

        // back buffer 以及两个 texture 可能还在被读取
        self.ctx.queue().flush()?;
        surface.resize(width, height)?;
        self.accumulation.resize(&self.ctx, width, height)?;
        self.output.resize(&self.ctx, width, height)?;
        self.accumulation_count = 0;
        Ok(())
    }

    /// 渲染一帧并 present，返回这一帧提交时 signal 的值
    pub fn render(&mut self, surface: &mut dyn SwapSurface) -> GfxResult<u64> {
        let _span = radiant_crate_tools::profile_span!("Renderer::render");

        if self.pipeline.check_hot_reload(self.ctx.queue(), self.compiler.as_ref())? {
            self.accumulation_count = 0;
        }
        // tonemap 不影响累积的结果
        self.post_pipeline.check_hot_reload(self.ctx.queue(), self.compiler.as_ref())?;
        if self.scene.refresh_tlas(&self.ctx)? != TlasRefresh::Unchanged {
            self.accumulation_count = 0;
        }
        let camera_data = self.camera.data();
        if camera_data != self.prev_camera {
            self.prev_camera = camera_data;
            self.accumulation_count = 0;
        }
        self.collect_released();

        let slot = self.frame_ring.current_slot_index();
        let frame_index = self.frame_ring.frame_id() as u32;
        let heap = self.ctx.descriptor_table().heap();
        let cmd = self.frame_ring.begin_frame(self.ctx.queue())?;

        // begin_frame 之后，这个槽位上一次的提交已经完成
        self.camera_buffer.write(slot, &camera_data)?;

        let accumulation = self.accumulation.texture();
        let output = self.output.texture();
        let back_buffer = surface.current_back_buffer();
        let (width, height) = output.extent();

        cmd.texture_barrier(accumulation, self.accumulation.state(), TextureState::Storage);
        match self.scene.material_srv() {
            Some(materials) if self.scene.tlas().is_some() => {
                cmd.bind_pipeline(self.pipeline.pipeline());
                cmd.bind_descriptor_heap(heap, self.binding.layout());

                self.binding.bind_table(cmd, self.accumulation.uav().gpu_handle, "outputTexture");
                self.binding.bind_direct(cmd, self.scene.tlas_address(), "sceneBVH");
                self.binding.bind_direct(cmd, self.camera_buffer.device_address(slot), "camera");
                self.binding.bind_table(cmd, materials.gpu_handle, "materials");
                self.binding.bind_constants(cmd, &[frame_index, self.accumulation_count], "renderData");

                cmd.trace_rays(&self.pipeline.shader_table().regions(), width, height, 1);
            }
            _ => log::trace!("scene is empty, skip trace rays"),
        }

        // tonemap: accumulation -> output
        cmd.texture_barrier(accumulation, TextureState::Storage, TextureState::ShaderRead);
        cmd.texture_barrier(output, self.output.state(), TextureState::Storage);
        if let Some(input) = self.accumulation.srv() {
            cmd.bind_pipeline(self.post_pipeline.pipeline());
            cmd.bind_descriptor_heap(heap, self.post_binding.layout());

            self.post_binding.bind_table(cmd, input.gpu_handle, "inputTexture");
            self.post_binding.bind_table(cmd, self.output.uav().gpu_handle, "outputTexture");
            // 包括这一帧在内的样本数
            let sample_count = self.accumulation_count.saturating_add(1);
            let constants = [width, height, sample_count, self.exposure.to_bits()];
            self.post_binding.bind_constants(cmd, &constants, "postProcess");

            self.post_pipeline.dispatch_2d(cmd, width, height);
        }

        cmd.texture_barrier(output, TextureState::Storage, TextureState::CopySrc);
        cmd.texture_barrier(back_buffer, TextureState::Undefined, TextureState::CopyDst);
        cmd.copy_texture(output, back_buffer);
        cmd.texture_barrier(back_buffer, TextureState::CopyDst, TextureState::Present);
        self.accumulation.set_state(TextureState::ShaderRead);
        self.output.set_state(TextureState::CopySrc);

        let value = self.frame_ring.end_frame(self.ctx.queue())?;
        surface.present(self.ctx.queue())?;
        self.accumulation_count = self.accumulation_count.saturating_add(1);
        Ok(value)
    }

    /// 释放 GPU 已经不再使用的 shader table 以及场景资源
    fn collect_released(&mut self) {
        let completed = self.ctx.queue().completed_value();
        let mut released = self.release_queue.collect(completed, &mut self.ctx.descriptor_table_mut());
        released += self.scene.collect_released(&self.ctx);
        if released > 0 {
            log::debug!("{} released {} resources", self.frame_name(), released);
        }
    }
}

//! 无窗口的渲染：读取 radiant.toml，渲染若干帧到离屏 surface，并输出每帧的耗时
//!
//! ```text
//! radiant-headless [config.toml]
//! ```

use std::{path::PathBuf, rc::Rc, time::Instant};

use anyhow::{Context, Result};
use itertools::Itertools;
use radiant_crate_tools::{init_log::init_log, profiling::start_profiler, resource::RadiantPath};
use radiant_gfx::{
    backend::{GfxBackend, mock::MockBackend, types::TextureFormat, vulkan::VulkanBackend},
    commands::frame_ring::FRAMES_IN_FLIGHT,
    pipelines::shader::SpirvFileCompiler,
    render_context::RenderContext,
    swapchain::swap_surface::OffscreenSurface,
};
use radiant_renderer::{
    config::{BackendKind, RendererConfig},
    renderer::Renderer,
};
use radiant_scene::shapes::demo_model;

fn main() -> Result<()> {
    init_log();

    let config_path = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(RadiantPath::config_path);
    let config = RendererConfig::load(&config_path)?;
    if config.profiling {
        start_profiler();
    }
    log::info!("config: {:?}", config);

    let backend: Rc<dyn GfxBackend> = match config.backend {
        BackendKind::Vulkan => Rc::new(
            VulkanBackend::new("radiant-headless", config.gfx.validation).context("创建 vulkan 设备失败")?,
        ),
        BackendKind::Mock => Rc::new(MockBackend::new()),
    };
    let ctx = RenderContext::new(backend, config.gfx.clone()).context("创建 RenderContext 失败")?;

    let mut surface = OffscreenSurface::new(
        ctx.allocator(),
        config.width,
        config.height,
        TextureFormat::Rgba8Unorm,
        FRAMES_IN_FLIGHT,
        "headless",
    )?;
    let mut renderer = Renderer::new(
        ctx,
        &surface,
        &config.shader_path,
        &config.tonemap_shader_path,
        Box::new(SpirvFileCompiler),
    )
    .with_context(|| format!("创建渲染器失败，shader: {:?} {:?}", config.shader_path, config.tonemap_shader_path))?;
    renderer.set_exposure(config.exposure);

    let load_start = Instant::now();
    renderer.load_model(demo_model("demo", config.demo_cubes))?;
    log::info!(
        "scene loaded in {:.2} ms: {} instances, {} materials",
        load_start.elapsed().as_secs_f64() * 1000.0,
        renderer.scene().instance_count(),
        renderer.scene().material_count()
    );

    let mut frame_times = Vec::with_capacity(config.frames as usize);
    for _ in 0..config.frames {
        let frame_start = Instant::now();
        renderer.render(&mut surface)?;
        let elapsed = frame_start.elapsed();
        log::debug!("{} {:.3} ms", renderer.frame_name(), elapsed.as_secs_f64() * 1000.0);
        frame_times.push(elapsed);

        if let Some(err) = renderer.last_compile_error() {
            log::warn!("shader compile error: {}", err);
        }
        if let Some(err) = renderer.post_process_compile_error() {
            log::warn!("tonemap shader compile error: {}", err);
        }
    }
    renderer.context().queue().flush()?;

    if let Some((min, max)) = frame_times.iter().minmax().into_option() {
        let total = frame_times.iter().sum::<std::time::Duration>();
        let average = total.as_secs_f64() * 1000.0 / frame_times.len() as f64;
        log::info!(
            "{} frames: avg {:.3} ms, min {:.3} ms, max {:.3} ms",
            frame_times.len(),
            average,
            min.as_secs_f64() * 1000.0,
            max.as_secs_f64() * 1000.0
        );
    }
    log::info!("presented {} frames", surface.presented_count());

    Ok(())
}

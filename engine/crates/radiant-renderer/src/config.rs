use std::path::{Path, PathBuf};

use radiant_crate_tools::resource::RadiantPath;
use radiant_gfx::config::GfxConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Vulkan,
    /// 内存中的模拟设备，不需要 GPU
    Mock,
}

/// `radiant.toml` 的内容，缺省的字段使用默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub backend: BackendKind,
    pub width: u32,
    pub height: u32,
    /// 编译好的 spir-v，包含 RayGen / Miss / ClosestHit
    pub shader_path: PathBuf,
    /// 后处理的 compute shader，入口是 `main`
    pub tonemap_shader_path: PathBuf,
    /// tonemap 之前乘到颜色上
    pub exposure: f32,
    /// headless 渲染的帧数
    pub frames: u32,
    /// 启动 tracy client
    pub profiling: bool,
    /// 程序生成的场景中立方体的数量
    pub demo_cubes: usize,
    pub gfx: GfxConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            width: 1280,
            height: 720,
            shader_path: RadiantPath::shader_build_path("rt/raytracing.slang"),
            tonemap_shader_path: RadiantPath::shader_build_path("pp/tonemap.slang"),
            exposure: 1.0,
            frames: 60,
            profiling: false,
            demo_cubes: 4,
            gfx: GfxConfig::default(),
        }
    }
}

impl RendererConfig {
    /// 文件不存在时使用默认值
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        radiant_crate_tools::config::load_toml_or_default(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.backend, BackendKind::Vulkan);
        assert_eq!((config.width, config.height), (1280, 720));
        assert!(config.shader_path.ends_with("rt/raytracing.slang.spv"));
        assert!(config.tonemap_shader_path.ends_with("pp/tonemap.slang.spv"));
        assert_eq!(config.exposure, 1.0);
        assert_eq!(config.gfx, GfxConfig::default());
    }

    #[test]
    fn test_nested_gfx_table() {
        let config: RendererConfig = radiant_crate_tools::config::parse_toml(
            r#"
backend = "mock"
frames = 3

[gfx]
reload_interval_ms = 0
"#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendKind::Mock);
        assert_eq!(config.frames, 3);
        assert_eq!(config.gfx.reload_interval_ms, 0);
        assert_eq!(config.gfx.descriptor_capacity, 1024);
        assert_eq!(config.width, 1280);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let result = radiant_crate_tools::config::parse_toml::<RendererConfig>("backend = \"d3d12\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = RendererConfig::load(dir.path().join("radiant.toml")).unwrap();
        assert_eq!(config, RendererConfig::default());
    }
}

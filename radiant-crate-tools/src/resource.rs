use std::path::{Path, PathBuf};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
///
/// # 使用示例
/// ```ignore
/// let config = RadiantPath::config_path();                      // radiant.toml
/// let shader = RadiantPath::shader_build_path("rt/rt.slang");   // engine/shader/.build/rt/rt.slang.spv
/// ```
pub struct RadiantPath {}
// 核心路径
impl RadiantPath {
    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.parent().map(Path::to_path_buf).unwrap_or_else(|| manifest_dir.to_path_buf())
    }

    pub fn target_path() -> PathBuf {
        Self::workspace_path().join("target")
    }

    /// 默认配置文件的位置
    pub fn config_path() -> PathBuf {
        Self::workspace_path().join("radiant.toml")
    }
}
// engine 目录下
impl RadiantPath {
    pub fn engine_path() -> PathBuf {
        Self::workspace_path().join("engine")
    }

    pub fn shader_root_path() -> PathBuf {
        Self::engine_path().join("shader")
    }

    /// 获取 `shader/.build/` 目录下的着色器路径（编译后的 SPIR-V）
    pub fn shader_build_path(filename: &str) -> PathBuf {
        let mut file_name = filename.to_string();
        file_name.push_str(".spv");
        Self::shader_root_path().join(".build").join(file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_build_path_appends_spv() {
        let path = RadiantPath::shader_build_path("rt/rt.slang");
        assert!(path.ends_with("engine/shader/.build/rt/rt.slang.spv"));
    }
}

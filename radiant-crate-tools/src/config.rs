//! TOML 配置加载
//!
//! 配置结构体自己负责 `#[serde(default)]`，这里只处理文件读写和错误上下文。

use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// 从 TOML 文件加载配置
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).with_context(|| format!("读取配置文件失败: {:?}", path))?;
    parse_toml(&content).with_context(|| format!("解析 TOML 配置失败: {:?}", path))
}

/// 配置文件不存在时使用默认值；文件存在但内容错误时仍然返回错误
pub fn load_toml_or_default<T: DeserializeOwned + Default>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    if !path.exists() {
        log::info!("config {:?} not found, using defaults", path);
        return Ok(T::default());
    }
    load_toml(path)
}

pub fn parse_toml<T: DeserializeOwned>(content: &str) -> anyhow::Result<T> {
    Ok(toml::from_str(content)?)
}

/// 保存配置到 TOML 文件
pub fn save_toml<T: Serialize>(value: &T, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(value).context("序列化配置失败")?;
    fs::write(path.as_ref(), content).with_context(|| format!("写入配置文件失败: {:?}", path.as_ref()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_missing_file_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let sample: Sample = load_toml_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(sample, Sample::default());
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.toml");
        let sample = Sample {
            name: "radiant".to_string(),
            count: 7,
        };
        save_toml(&sample, &path).unwrap();

        let loaded: Sample = load_toml(&path).unwrap();
        assert_eq!(loaded, sample);
    }

    #[test]
    fn test_bad_content_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "count = \"not a number\"").unwrap();

        let err = load_toml::<Sample>(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.toml"));
    }

    #[test]
    fn test_partial_content_fills_defaults() {
        let sample: Sample = parse_toml("count = 3").unwrap();
        assert_eq!(sample.count, 3);
        assert!(sample.name.is_empty());
    }
}

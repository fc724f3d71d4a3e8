//! Radiant 工具集
//!
//! 提供日志初始化、TOML 配置加载、工作区路径管理以及 tracy 性能分析的辅助宏。
//!
//! # RadiantPath
//! 基于工作区根目录的统一路径管理，避免硬编码相对路径。
//!
//! # 配置
//! 所有配置文件都是 TOML，缺省字段使用 `Default` 补全，见 [`config::load_toml`]。

pub mod config;
pub mod init_log;
pub mod profiling;
pub mod resource;

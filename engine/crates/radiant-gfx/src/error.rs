//! GFX 层的错误类型
//!
//! 错误分为三类：
//! - 致命的配置错误（设备、队列创建失败，描述符表容量不足，不支持光追）：以 `Err` 向上传递，启动流程直接终止
//! - 可恢复的内容错误（shader 编译失败、非法的图片数据）：在触发的操作边界处被捕获，转换为状态和消息
//! - 编程错误（向已关闭的 recorder 录制、未知的 binding 名称）：直接 panic，不在这里表示

use std::path::PathBuf;

pub type GfxResult<T> = Result<T, GfxError>;

#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    #[error("no usable graphics device: {0}")]
    DeviceUnavailable(String),

    #[error("required capability is not supported: {0}")]
    Unsupported(String),

    #[error("failed to create {what} '{label}': {details}")]
    Creation {
        what: &'static str,
        label: String,
        details: String,
    },

    #[error("descriptor table '{label}' exhausted: requested {requested}, {allocated}/{capacity} already allocated")]
    DescriptorCapacityExceeded {
        label: String,
        requested: u32,
        allocated: u32,
        capacity: u32,
    },

    #[error("'{label}' is not host visible, write it through the upload stager")]
    NotHostVisible { label: String },

    #[error("access of {len} bytes at offset {offset} is out of bounds for '{label}' ({size} bytes)")]
    OutOfBounds {
        label: String,
        offset: u64,
        len: u64,
        size: u64,
    },

    #[error("invalid upload to '{label}': {reason}")]
    InvalidUpload { label: String, reason: String },

    #[error("top-level structure '{label}' holds {expected} instances, refit got {actual}; a full build is required")]
    InstanceCountMismatch {
        label: String,
        expected: usize,
        actual: usize,
    },

    #[error("binding layout '{label}' needs {required} bytes of root data, device allows {limit}")]
    BindingLayoutTooLarge { label: String, required: u32, limit: u32 },

    #[error(transparent)]
    ShaderCompile(#[from] ShaderCompileError),

    #[error("timeline '{label}' is waited at {value}, which was never signaled")]
    WaitOnUnsignaled { label: String, value: u64 },

    #[error("device lost: {0}")]
    DeviceLost(String),

    #[error("vulkan call failed: {0}")]
    Vulkan(#[from] ash::vk::Result),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// shader 编译失败，属于可恢复的内容错误
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to compile '{}': {message}", .path.display())]
pub struct ShaderCompileError {
    pub path: PathBuf,
    pub message: String,
}

impl ShaderCompileError {
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl GfxError {
    pub(crate) fn creation(what: &'static str, label: impl Into<String>, details: impl ToString) -> Self {
        Self::Creation {
            what,
            label: label.into(),
            details: details.to_string(),
        }
    }
}

use std::path::PathBuf;

use radiant_gfx::error::GfxError;

pub type SceneResult<T> = Result<T, SceneError>;

/// 除了 `Gfx` 以外都是内容错误，加载失败时场景保持不变
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("unsupported model format: {}", .path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("failed to read model {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid mesh '{mesh}' in model '{model}': {reason}")]
    InvalidMesh { model: String, mesh: String, reason: String },

    #[error("invalid texture '{texture}' in model '{model}': {reason}")]
    InvalidTexture { model: String, texture: String, reason: String },

    #[error("invalid material {material} in model '{model}': {reason}")]
    InvalidMaterial { model: String, material: usize, reason: String },

    #[error(transparent)]
    Gfx(#[from] GfxError),
}

impl SceneError {
    /// 内容错误可以在操作边界处恢复；GFX 错误需要继续向上传递
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Gfx(_))
    }
}

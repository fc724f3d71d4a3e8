use serde::{Deserialize, Serialize};

/// GFX 层的配置，对应 `radiant.toml` 中的 `[gfx]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GfxConfig {
    /// 同时在 GPU 上执行的帧数
    pub frames_in_flight: usize,
    /// 描述符表的容量，超出时启动失败
    pub descriptor_capacity: u32,
    /// 上传图片时每一行的对齐
    pub upload_row_alignment: u32,
    /// shader 热重载检查的最小间隔
    pub reload_interval_ms: u64,
    /// 是否开启 vulkan 的 debug messenger
    pub validation: bool,
}

impl Default for GfxConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: crate::commands::frame_ring::FRAMES_IN_FLIGHT,
            descriptor_capacity: 1024,
            upload_row_alignment: 256,
            reload_interval_ms: 500,
            validation: true,
        }
    }
}

impl GfxConfig {
    #[inline]
    pub fn reload_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reload_interval_ms)
    }
}

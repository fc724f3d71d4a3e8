use std::rc::Rc;

use crate::{
    backend::{
        GfxBackend,
        types::{DeviceCapabilities, ShaderTableProperties},
    },
    error::GfxResult,
};

/// 对后端的不透明封装
///
/// 只负责回答能力查询，以及把后端共享给其他组件。clone 只是增加引用计数
#[derive(Clone)]
pub struct DeviceHandle {
    backend: Rc<dyn GfxBackend>,
}

// new & init
impl DeviceHandle {
    pub fn new(backend: Rc<dyn GfxBackend>) -> Self {
        let caps = backend.capabilities();
        log::info!(
            "device: {} ({} backend), ray tracing: {}, push constant limit: {} bytes",
            caps.adapter_name,
            backend.name(),
            caps.ray_tracing,
            caps.max_push_constant_size
        );
        Self { backend }
    }
}

// getters
impl DeviceHandle {
    #[inline]
    pub fn backend(&self) -> &dyn GfxBackend {
        self.backend.as_ref()
    }

    #[inline]
    pub fn capabilities(&self) -> &DeviceCapabilities {
        self.backend.capabilities()
    }

    #[inline]
    pub fn supports_ray_tracing(&self) -> bool {
        self.capabilities().ray_tracing
    }

    #[inline]
    pub fn adapter_name(&self) -> &str {
        &self.capabilities().adapter_name
    }

    #[inline]
    pub fn shader_table_properties(&self) -> ShaderTableProperties {
        self.capabilities().shader_table
    }

    #[inline]
    pub fn max_push_constant_size(&self) -> u32 {
        self.capabilities().max_push_constant_size
    }
}

// tools
impl DeviceHandle {
    #[inline]
    pub fn wait_idle(&self) -> GfxResult<()> {
        self.backend.wait_idle()
    }
}

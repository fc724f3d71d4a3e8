use std::{cell::RefCell, rc::Rc};

use crate::{
    backend::types::{TextureDesc, TextureFormat, TextureUsage},
    foundation::device::DeviceHandle,
    resources::{allocator::AllocationStats, handles::TextureHandle},
};

/// 2D texture，所有权语义与 [`GpuBuffer`](crate::resources::buffer::GpuBuffer) 相同
pub struct GpuTexture {
    handle: TextureHandle,
    width: u32,
    height: u32,
    format: TextureFormat,
    usage: TextureUsage,
    label: String,

    device: DeviceHandle,
    stats: Rc<RefCell<AllocationStats>>,
}

// new & init
impl GpuTexture {
    pub(crate) fn new(
        device: DeviceHandle,
        stats: Rc<RefCell<AllocationStats>>,
        handle: TextureHandle,
        desc: TextureDesc,
    ) -> Self {
        Self {
            handle,
            width: desc.width,
            height: desc.height,
            format: desc.format,
            usage: desc.usage,
            label: desc.label,
            device,
            stats,
        }
    }
}

// getters
impl GpuTexture {
    #[inline]
    pub fn handle(&self) -> TextureHandle {
        self.handle
    }
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }
    #[inline]
    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }
    #[inline]
    pub fn format(&self) -> TextureFormat {
        self.format
    }
    #[inline]
    pub fn usage(&self) -> TextureUsage {
        self.usage
    }
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }
    #[inline]
    pub fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.format.texel_size() as u64
    }
}

impl Drop for GpuTexture {
    fn drop(&mut self) {
        self.device.backend().destroy_texture(self.handle);
        let mut stats = self.stats.borrow_mut();
        stats.live_textures -= 1;
        stats.texture_bytes -= self.byte_size();
    }
}

impl std::fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuTexture")
            .field("label", &self.label)
            .field("extent", &(self.width, self.height))
            .field("format", &self.format)
            .finish()
    }
}

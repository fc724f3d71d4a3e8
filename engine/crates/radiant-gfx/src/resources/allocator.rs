use std::{cell::RefCell, rc::Rc};

use crate::{
    backend::types::{BufferDesc, BufferUsage, MemoryKind, TextureDesc, TextureFormat, TextureUsage},
    error::GfxResult,
    foundation::device::DeviceHandle,
    resources::{buffer::GpuBuffer, texture::GpuTexture},
};

/// 存活资源的统计，用于诊断
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationStats {
    pub live_buffers: usize,
    pub live_textures: usize,
    pub buffer_bytes: u64,
    pub texture_bytes: u64,
}

/// 创建 typed buffer 和 texture
///
/// 不持有任何执行状态，clone 之后共享同一份统计
#[derive(Clone)]
pub struct GpuMemoryAllocator {
    device: DeviceHandle,
    stats: Rc<RefCell<AllocationStats>>,
}

// new & init
impl GpuMemoryAllocator {
    pub fn new(device: DeviceHandle) -> Self {
        Self {
            device,
            stats: Rc::new(RefCell::new(AllocationStats::default())),
        }
    }
}

// getters
impl GpuMemoryAllocator {
    #[inline]
    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    #[inline]
    pub fn stats(&self) -> AllocationStats {
        *self.stats.borrow()
    }
}

// tools
impl GpuMemoryAllocator {
    /// 0 字节的请求会被修正为 1 字节
    pub fn create_buffer(
        &self,
        size: u64,
        usage: BufferUsage,
        memory: MemoryKind,
        label: impl AsRef<str>,
    ) -> GfxResult<GpuBuffer> {
        self.create_buffer_with_alignment(size, usage, memory, None, label)
    }

    pub fn create_buffer_with_alignment(
        &self,
        size: u64,
        usage: BufferUsage,
        memory: MemoryKind,
        alignment: Option<u64>,
        label: impl AsRef<str>,
    ) -> GfxResult<GpuBuffer> {
        let label = label.as_ref();
        let size = if size == 0 {
            log::warn!("buffer '{}' requested with size 0, clamped to 1 byte", label);
            1
        } else {
            size
        };

        let desc = BufferDesc {
            size,
            usage,
            memory,
            alignment,
            label: label.to_string(),
        };
        let handle = self.device.backend().create_buffer(&desc)?;
        let device_address = self.device.backend().buffer_device_address(handle);

        {
            let mut stats = self.stats.borrow_mut();
            stats.live_buffers += 1;
            stats.buffer_bytes += size;
        }

        Ok(GpuBuffer::new(self.device.clone(), self.stats.clone(), handle, desc, device_address))
    }

    pub fn create_texture(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsage,
        label: impl AsRef<str>,
    ) -> GfxResult<GpuTexture> {
        let desc = TextureDesc {
            width: width.max(1),
            height: height.max(1),
            format,
            usage,
            label: label.as_ref().to_string(),
        };
        let handle = self.device.backend().create_texture(&desc)?;
        let bytes = desc.width as u64 * desc.height as u64 * format.texel_size() as u64;

        {
            let mut stats = self.stats.borrow_mut();
            stats.live_textures += 1;
            stats.texture_bytes += bytes;
        }

        Ok(GpuTexture::new(self.device.clone(), self.stats.clone(), handle, desc))
    }
}

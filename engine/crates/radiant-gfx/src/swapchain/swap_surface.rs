use crate::{
    backend::types::{TextureFormat, TextureUsage},
    commands::command_queue::ExecutionQueue,
    error::GfxResult,
    resources::{allocator::GpuMemoryAllocator, texture::GpuTexture},
};

/// 呈现的接口
///
/// 每一帧渲染到 `current_back_buffer`，然后 `present`
pub trait SwapSurface {
    fn buffer_count(&self) -> usize;

    fn current_back_buffer_index(&self) -> usize;

    fn current_back_buffer(&self) -> &GpuTexture;

    /// 呈现当前的 back buffer，并切换到下一个
    fn present(&mut self, queue: &ExecutionQueue) -> GfxResult<()>;

    /// 调用者需要先 flush 队列
    fn resize(&mut self, width: u32, height: u32) -> GfxResult<()>;

    fn extent(&self) -> (u32, u32);

    fn format(&self) -> TextureFormat;
}

/// 离屏的 surface：若干个 texture 组成的环，适用于任何后端
pub struct OffscreenSurface {
    back_buffers: Vec<GpuTexture>,
    current: usize,
    width: u32,
    height: u32,
    format: TextureFormat,

    presented_count: u64,
    /// 最近一次 present 时队列 signal 的值
    last_present_value: u64,
    label: String,

    allocator: GpuMemoryAllocator,
}

// new & init
impl OffscreenSurface {
    pub fn new(
        allocator: &GpuMemoryAllocator,
        width: u32,
        height: u32,
        format: TextureFormat,
        buffer_count: usize,
        label: impl AsRef<str>,
    ) -> GfxResult<Self> {
        assert!(buffer_count > 0, "surface needs at least one back buffer");
        let label = label.as_ref().to_string();
        let back_buffers = Self::create_back_buffers(allocator, width, height, format, buffer_count, &label)?;
        log::info!("offscreen surface '{}' created: {}x{} {:?} x{}", label, width, height, format, buffer_count);

        Ok(Self {
            back_buffers,
            current: 0,
            width,
            height,
            format,
            presented_count: 0,
            last_present_value: 0,
            label,
            allocator: allocator.clone(),
        })
    }

    fn create_back_buffers(
        allocator: &GpuMemoryAllocator,
        width: u32,
        height: u32,
        format: TextureFormat,
        buffer_count: usize,
        label: &str,
    ) -> GfxResult<Vec<GpuTexture>> {
        (0..buffer_count)
            .map(|index| {
                allocator.create_texture(
                    width,
                    height,
                    format,
                    TextureUsage::TRANSFER_DST | TextureUsage::TRANSFER_SRC,
                    format!("{}-back-buffer-{}", label, index),
                )
            })
            .collect()
    }
}

// getters
impl OffscreenSurface {
    #[inline]
    pub fn presented_count(&self) -> u64 {
        self.presented_count
    }
    #[inline]
    pub fn last_present_value(&self) -> u64 {
        self.last_present_value
    }
    #[inline]
    pub fn back_buffer(&self, index: usize) -> &GpuTexture {
        &self.back_buffers[index]
    }
}

impl SwapSurface for OffscreenSurface {
    #[inline]
    fn buffer_count(&self) -> usize {
        self.back_buffers.len()
    }

    #[inline]
    fn current_back_buffer_index(&self) -> usize {
        self.current
    }

    #[inline]
    fn current_back_buffer(&self) -> &GpuTexture {
        &self.back_buffers[self.current]
    }

    fn present(&mut self, queue: &ExecutionQueue) -> GfxResult<()> {
        let _span = radiant_crate_tools::profile_span!("OffscreenSurface::present");
        self.last_present_value = queue.signal()?;
        self.presented_count += 1;
        self.current = (self.current + 1) % self.back_buffers.len();
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> GfxResult<()> {
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        let buffer_count = self.back_buffers.len();
        self.back_buffers =
            Self::create_back_buffers(&self.allocator, width, height, self.format, buffer_count, &self.label)?;
        self.width = width;
        self.height = height;
        self.current = 0;
        log::info!("offscreen surface '{}' resized to {}x{}", self.label, width, height);
        Ok(())
    }

    #[inline]
    fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    fn format(&self) -> TextureFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{backend::{mock::MockBackend, types::QueueKind}, foundation::device::DeviceHandle};

    #[test]
    fn test_present_rotates_back_buffers() {
        let device = DeviceHandle::new(Rc::new(MockBackend::new()));
        let allocator = GpuMemoryAllocator::new(device.clone());
        let queue = ExecutionQueue::new(device, QueueKind::Graphics, "gfx").unwrap();
        let mut surface = OffscreenSurface::new(&allocator, 4, 4, TextureFormat::Rgba8Unorm, 3, "surface").unwrap();

        let first = surface.current_back_buffer().handle();
        for expected in [1, 2, 0, 1] {
            surface.present(&queue).unwrap();
            assert_eq!(surface.current_back_buffer_index(), expected);
        }
        assert_eq!(surface.presented_count(), 4);
        assert_eq!(surface.last_present_value(), queue.last_signaled());
        assert_ne!(surface.current_back_buffer().handle(), first);
    }

    #[test]
    fn test_resize_recreates_back_buffers() {
        let device = DeviceHandle::new(Rc::new(MockBackend::new()));
        let allocator = GpuMemoryAllocator::new(device.clone());
        let queue = ExecutionQueue::new(device, QueueKind::Graphics, "gfx").unwrap();
        let mut surface = OffscreenSurface::new(&allocator, 4, 4, TextureFormat::Rgba8Unorm, 2, "surface").unwrap();
        surface.present(&queue).unwrap();

        surface.resize(8, 2).unwrap();
        assert_eq!(surface.extent(), (8, 2));
        assert_eq!(surface.current_back_buffer_index(), 0);
        assert_eq!(surface.current_back_buffer().extent(), (8, 2));
        assert_eq!(allocator.stats().live_textures, 2);
    }
}

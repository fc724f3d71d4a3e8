use std::collections::VecDeque;

use crate::{
    backend::types::{BufferUsage, MemoryKind, QueueKind, TextureFormat},
    basic::align::align_up,
    commands::{command_queue::ExecutionQueue, command_recorder::CommandRecorder, gfx_command::TextureState},
    error::{GfxError, GfxResult},
    foundation::device::DeviceHandle,
    resources::{allocator::GpuMemoryAllocator, buffer::GpuBuffer, texture::GpuTexture},
};

/// 已经提交，但是还没有退休的一批 staging buffer
struct PendingUpload {
    fence_value: u64,
    staging_buffers: Vec<GpuBuffer>,
}

/// 通过 staging buffer 把 CPU 数据传到 GPU
///
/// 使用专用的上传队列。staging buffer 只有在上传队列完成对应的 copy 之后才会释放。
/// 其他队列读取目标资源之前，需要先 flush，或者 `synchronize_with` 上传队列
pub struct UploadStager {
    queue: ExecutionQueue,
    /// 正在录制的 recorder，第一次上传时获取
    recorder: Option<CommandRecorder>,
    /// 被 recorder 引用的 staging buffer
    staged: Vec<GpuBuffer>,
    pending: VecDeque<PendingUpload>,
    row_alignment: u32,

    allocator: GpuMemoryAllocator,
}

// new & init
impl UploadStager {
    pub fn new(device: DeviceHandle, allocator: GpuMemoryAllocator, row_alignment: u32) -> GfxResult<Self> {
        assert!(row_alignment.is_power_of_two(), "row alignment must be a power of 2");
        Ok(Self {
            queue: ExecutionQueue::new(device, QueueKind::Upload, "upload")?,
            recorder: None,
            staged: Vec::new(),
            pending: VecDeque::new(),
            row_alignment,
            allocator,
        })
    }
}

// getters
impl UploadStager {
    #[inline]
    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }
    /// 已录制但是还没有提交的 staging buffer 数量
    #[inline]
    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }
    /// 已提交但是还没有退休的批次数量
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
    #[inline]
    pub fn row_alignment(&self) -> u32 {
        self.row_alignment
    }

    /// 上传图片时 staging buffer 中一行的字节数，超出 u32 时为 None
    #[inline]
    pub fn row_pitch(&self, width: u32, format: TextureFormat) -> Option<u32> {
        let row_bytes = (width as u64).checked_mul(format.texel_size() as u64)?;
        u32::try_from(align_up(row_bytes, self.row_alignment as u64)).ok()
    }
}

// upload
impl UploadStager {
    #[inline]
    pub fn upload(&mut self, dst: &GpuBuffer, data: &[u8]) -> GfxResult<()> {
        self.upload_at(dst, 0, data)
    }

    #[inline]
    pub fn upload_slice<T: bytemuck::Pod>(&mut self, dst: &GpuBuffer, values: &[T]) -> GfxResult<()> {
        self.upload_at(dst, 0, bytemuck::cast_slice(values))
    }

    /// 将 data 复制到 staging buffer 中，并录制 staging -> dst 的 copy
    pub fn upload_at(&mut self, dst: &GpuBuffer, offset: u64, data: &[u8]) -> GfxResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        if offset.checked_add(data.len() as u64).is_none_or(|end| end > dst.size()) {
            return Err(GfxError::OutOfBounds {
                label: dst.label().to_string(),
                offset,
                len: data.len() as u64,
                size: dst.size(),
            });
        }

        let staging = self.allocator.create_buffer(
            data.len() as u64,
            BufferUsage::TRANSFER_SRC,
            MemoryKind::Upload,
            format!("{}-staging", dst.label()),
        )?;
        staging.write(0, data)?;

        self.recorder()?.copy_buffer(&staging, 0, dst, offset, data.len() as u64);
        self.staged.push(staging);
        Ok(())
    }

    /// 按照对齐后的 row pitch 逐行写入 staging buffer，然后复制到 texture
    ///
    /// 数据长度或者尺寸不匹配时返回 `InvalidUpload`，不会录制任何命令
    pub fn upload_image(
        &mut self,
        dst: &GpuTexture,
        data: &[u8],
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> GfxResult<()> {
        let invalid = |reason: String| GfxError::InvalidUpload {
            label: dst.label().to_string(),
            reason,
        };

        let Some(row_pitch) = self.row_pitch(width, format) else {
            return Err(invalid(format!("a row of {} {:?} texels overflows the row pitch", width, format)));
        };
        let row_bytes = width as u64 * format.texel_size() as u64;
        let expected = row_bytes
            .checked_mul(height as u64)
            .and_then(|bytes| usize::try_from(bytes).ok())
            .ok_or_else(|| invalid(format!("{}x{} {:?} image is too large", width, height, format)))?;
        if data.len() != expected {
            return Err(invalid(format!(
                "{}x{} {:?} image needs {} bytes, got {}",
                width,
                height,
                format,
                expected,
                data.len()
            )));
        }
        if dst.extent() != (width, height) || dst.format() != format {
            return Err(invalid(format!(
                "image is {}x{} {:?}, destination is {}x{} {:?}",
                width,
                height,
                format,
                dst.width(),
                dst.height(),
                dst.format()
            )));
        }

        let row_bytes = row_bytes as usize;
        let mut padded = vec![0u8; row_pitch as usize * height as usize];
        for (row, src) in data.chunks_exact(row_bytes.max(1)).enumerate().take(height as usize) {
            let start = row * row_pitch as usize;
            padded[start..start + row_bytes].copy_from_slice(src);
        }

        let staging = self.allocator.create_buffer(
            padded.len() as u64,
            BufferUsage::TRANSFER_SRC,
            MemoryKind::Upload,
            format!("{}-staging", dst.label()),
        )?;
        staging.write(0, &padded)?;

        let recorder = self.recorder()?;
        recorder.texture_barrier(dst, TextureState::Undefined, TextureState::CopyDst);
        recorder.copy_buffer_to_texture(&staging, 0, row_pitch, dst);
        recorder.texture_barrier(dst, TextureState::CopyDst, TextureState::ShaderRead);
        self.staged.push(staging);
        Ok(())
    }

    fn recorder(&mut self) -> GfxResult<&mut CommandRecorder> {
        let recorder = match self.recorder.take() {
            Some(recorder) => recorder,
            None => self.queue.acquire_recorder("upload")?,
        };
        Ok(self.recorder.insert(recorder))
    }
}

// submit & retire
impl UploadStager {
    /// 异步提交已录制的 copy，staging buffer 进入 pending 队列
    ///
    /// 没有任何录制时返回 None
    pub fn submit(&mut self) -> GfxResult<Option<u64>> {
        let Some(recorder) = self.recorder.take() else {
            return Ok(None);
        };

        let fence_value = self.queue.execute(recorder)?;
        self.pending.push_back(PendingUpload {
            fence_value,
            staging_buffers: std::mem::take(&mut self.staged),
        });
        Ok(Some(fence_value))
    }

    /// 释放已经退休的 staging buffer，返回释放的数量
    pub fn collect_retired(&mut self) -> usize {
        let _span = radiant_crate_tools::profile_span!("UploadStager::collect_retired");
        let mut released = 0;
        while let Some(front) = self.pending.front() {
            if !self.queue.is_complete(front.fence_value) {
                break;
            }
            if let Some(batch) = self.pending.pop_front() {
                released += batch.staging_buffers.len();
            }
        }
        released
    }

    /// 提交所有录制的 copy，等待上传队列完成，然后释放所有 staging buffer
    pub fn flush(&mut self) -> GfxResult<()> {
        let _span = radiant_crate_tools::profile_span!("UploadStager::flush");
        self.submit()?;
        self.queue.wait_for(self.queue.last_signaled())?;
        let released = self.collect_retired();
        if released > 0 {
            log::debug!("upload flushed, {} staging buffers released", released);
        }
        debug_assert!(self.pending.is_empty());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{rc::Rc, time::Duration};

    use super::*;
    use crate::{backend::mock::MockBackend, backend::types::TextureUsage};

    fn stager(backend: Rc<MockBackend>) -> (UploadStager, GpuMemoryAllocator) {
        let device = DeviceHandle::new(backend);
        let allocator = GpuMemoryAllocator::new(device.clone());
        (UploadStager::new(device, allocator.clone(), 256).unwrap(), allocator)
    }

    #[test]
    fn test_buffer_upload_reaches_destination() {
        let backend = Rc::new(MockBackend::new());
        let (mut stager, allocator) = stager(backend.clone());
        let dst = allocator.create_buffer(16, BufferUsage::STORAGE, MemoryKind::DeviceLocal, "dst").unwrap();

        stager.upload_slice(&dst, &[1u32, 2, 3, 4]).unwrap();
        assert_eq!(stager.staged_count(), 1);
        stager.flush().unwrap();

        assert_eq!(stager.staged_count(), 0);
        assert_eq!(stager.pending_count(), 0);
        let bytes = backend.debug_read_buffer(dst.handle());
        assert_eq!(bytemuck::cast_slice::<u8, u32>(&bytes), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_upload_at_offset_and_bounds() {
        let backend = Rc::new(MockBackend::new());
        let (mut stager, allocator) = stager(backend.clone());
        let dst = allocator.create_buffer(8, BufferUsage::STORAGE, MemoryKind::DeviceLocal, "dst").unwrap();

        stager.upload_at(&dst, 4, &[9, 9, 9, 9]).unwrap();
        assert!(matches!(stager.upload_at(&dst, 6, &[0; 4]), Err(GfxError::OutOfBounds { .. })));
        stager.flush().unwrap();
        assert_eq!(backend.debug_read_buffer(dst.handle()), vec![0, 0, 0, 0, 9, 9, 9, 9]);
    }

    #[test]
    fn test_row_pitch_round_trip() {
        let backend = Rc::new(MockBackend::new());
        let (mut stager, allocator) = stager(backend.clone());

        // 每行 13 * 4 = 52 字节，不是 256 的整数倍
        let (width, height) = (13, 7);
        let texture = allocator
            .create_texture(width, height, TextureFormat::Rgba8Unorm, TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST, "img")
            .unwrap();
        let data = (0..width * height * 4).map(|i| (i % 251) as u8).collect::<Vec<_>>();

        assert_eq!(stager.row_pitch(width, TextureFormat::Rgba8Unorm), Some(256));
        stager.upload_image(&texture, &data, width, height, TextureFormat::Rgba8Unorm).unwrap();
        stager.flush().unwrap();

        assert_eq!(backend.texture_bytes(texture.handle()), data);
        assert_eq!(backend.texture_state(texture.handle()), TextureState::ShaderRead);
    }

    #[test]
    fn test_invalid_image_upload_rejected() {
        let backend = Rc::new(MockBackend::new());
        let (mut stager, allocator) = stager(backend.clone());
        let texture = allocator
            .create_texture(4, 4, TextureFormat::Rgba8Unorm, TextureUsage::SAMPLED, "img")
            .unwrap();

        let short = vec![0u8; 4 * 4 * 4 - 1];
        assert!(matches!(
            stager.upload_image(&texture, &short, 4, 4, TextureFormat::Rgba8Unorm),
            Err(GfxError::InvalidUpload { .. })
        ));
        let other_size = vec![0u8; 8 * 2 * 4];
        assert!(matches!(
            stager.upload_image(&texture, &other_size, 8, 2, TextureFormat::Rgba8Unorm),
            Err(GfxError::InvalidUpload { .. })
        ));
        assert_eq!(stager.staged_count(), 0);
        assert_eq!(stager.submit().unwrap(), None);
    }

    #[test]
    fn test_huge_row_rejected_without_overflow() {
        let backend = Rc::new(MockBackend::new());
        let (mut stager, allocator) = stager(backend.clone());
        let texture = allocator
            .create_texture(4, 4, TextureFormat::Rgba32Float, TextureUsage::SAMPLED, "img")
            .unwrap();

        // 16 字节的 texel，一行超过 4 GiB
        let width = u32::MAX / 8;
        assert_eq!(stager.row_pitch(width, TextureFormat::Rgba32Float), None);
        assert_eq!(stager.row_pitch(4, TextureFormat::Rgba32Float), Some(256));
        assert!(matches!(
            stager.upload_image(&texture, &[], width, 1, TextureFormat::Rgba32Float),
            Err(GfxError::InvalidUpload { .. })
        ));
        assert!(matches!(
            stager.upload_image(&texture, &[], 1, u32::MAX, TextureFormat::Rgba32Float),
            Err(GfxError::InvalidUpload { .. })
        ));
        assert_eq!(stager.staged_count(), 0);
    }

    #[test]
    fn test_async_submit_releases_after_retirement() {
        let backend = Rc::new(MockBackend::with_latency(Duration::from_millis(20)));
        let (mut stager, allocator) = stager(backend.clone());
        let dst = allocator.create_buffer(4, BufferUsage::STORAGE, MemoryKind::DeviceLocal, "dst").unwrap();

        stager.upload(&dst, &[1, 2, 3, 4]).unwrap();
        let value = stager.submit().unwrap().unwrap();
        assert_eq!(stager.pending_count(), 1);
        assert_eq!(stager.collect_retired(), 0);
        let live_before = allocator.stats().live_buffers;

        stager.queue().wait_for(value).unwrap();
        assert_eq!(stager.collect_retired(), 1);
        assert_eq!(allocator.stats().live_buffers, live_before - 1);
    }
}

use radiant_gfx::{
    backend::types::{DescriptorView, TextureFormat, TextureUsage},
    commands::gfx_command::TextureState,
    descriptors::descriptor_table::DescriptorAllocation,
    error::GfxResult,
    render_context::RenderContext,
    resources::texture::GpuTexture,
};

/// 一个 storage texture，以及它在描述符表中的 UAV
///
/// - 光追的累积 buffer：同时有一个 SRV，供后处理采样
/// - 后处理的输出：每帧结束时被复制到 back buffer
pub struct OutputTexture {
    texture: GpuTexture,
    uav: DescriptorAllocation,
    srv: Option<DescriptorAllocation>,
    /// 上一帧结束时的状态
    state: TextureState,
    label: String,
}

// new & init
impl OutputTexture {
    /// 只有 UAV，可以作为 copy 的源
    pub fn new(
        ctx: &RenderContext,
        width: u32,
        height: u32,
        format: TextureFormat,
        label: impl AsRef<str>,
    ) -> GfxResult<Self> {
        Self::with_views(ctx, width, height, format, false, label)
    }

    /// 同时分配 UAV 和 SRV
    pub fn new_sampled(
        ctx: &RenderContext,
        width: u32,
        height: u32,
        format: TextureFormat,
        label: impl AsRef<str>,
    ) -> GfxResult<Self> {
        Self::with_views(ctx, width, height, format, true, label)
    }

    fn with_views(
        ctx: &RenderContext,
        width: u32,
        height: u32,
        format: TextureFormat,
        sampled: bool,
        label: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let label = label.as_ref().to_string();
        let (texture, uav, srv) = Self::create(ctx, width, height, format, sampled, &label)?;
        Ok(Self {
            texture,
            uav,
            srv,
            state: TextureState::Undefined,
            label,
        })
    }

    /// 失败时不会留下任何已分配的描述符
    fn create(
        ctx: &RenderContext,
        width: u32,
        height: u32,
        format: TextureFormat,
        sampled: bool,
        label: &str,
    ) -> GfxResult<(GpuTexture, DescriptorAllocation, Option<DescriptorAllocation>)> {
        let usage = if sampled {
            TextureUsage::STORAGE | TextureUsage::SAMPLED
        } else {
            TextureUsage::STORAGE | TextureUsage::TRANSFER_SRC
        };
        let texture = ctx.allocator().create_texture(width, height, format, usage, label)?;

        let mut descriptor_table = ctx.descriptor_table_mut();
        let uav = descriptor_table.allocate()?;
        let srv = if sampled {
            match descriptor_table.allocate() {
                Ok(srv) => Some(srv),
                Err(err) => {
                    descriptor_table.free(uav);
                    return Err(err);
                }
            }
        } else {
            None
        };

        descriptor_table.write_view(uav, DescriptorView::StorageTexture(texture.handle()));
        if let Some(srv) = srv {
            descriptor_table.write_view(srv, DescriptorView::SampledTexture(texture.handle()));
        }
        Ok((texture, uav, srv))
    }
}

// getters
impl OutputTexture {
    #[inline]
    pub fn texture(&self) -> &GpuTexture {
        &self.texture
    }
    #[inline]
    pub fn uav(&self) -> DescriptorAllocation {
        self.uav
    }
    /// 只有 `new_sampled` 创建的才有
    #[inline]
    pub fn srv(&self) -> Option<DescriptorAllocation> {
        self.srv
    }
    #[inline]
    pub fn state(&self) -> TextureState {
        self.state
    }
    #[inline]
    pub fn extent(&self) -> (u32, u32) {
        self.texture.extent()
    }
}

// update
impl OutputTexture {
    #[inline]
    pub fn set_state(&mut self, state: TextureState) {
        self.state = state;
    }

    /// 按照新的尺寸重新创建 texture 以及描述符，然后释放旧的
    ///
    /// 调用者需要先 flush 队列。创建失败时保留原来的 texture 和描述符
    pub fn resize(&mut self, ctx: &RenderContext, width: u32, height: u32) -> GfxResult<()> {
        let (texture, uav, srv) =
            Self::create(ctx, width, height, self.texture.format(), self.srv.is_some(), &self.label)?;

        let old_uav = std::mem::replace(&mut self.uav, uav);
        let old_srv = std::mem::replace(&mut self.srv, srv);
        self.texture = texture;
        self.state = TextureState::Undefined;

        let mut descriptor_table = ctx.descriptor_table_mut();
        descriptor_table.free(old_uav);
        if let Some(old_srv) = old_srv {
            descriptor_table.free(old_srv);
        }
        log::info!("output texture '{}' resized to {}x{}", self.label, width, height);
        Ok(())
    }

    /// 销毁之前调用，释放描述符
    pub fn release(&mut self, ctx: &RenderContext) {
        let mut descriptor_table = ctx.descriptor_table_mut();
        descriptor_table.free(self.uav);
        if let Some(srv) = self.srv.take() {
            descriptor_table.free(srv);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use radiant_gfx::{backend::mock::MockBackend, config::GfxConfig, error::GfxError};

    use super::*;

    fn context(descriptor_capacity: u32) -> (Rc<MockBackend>, RenderContext) {
        let backend = Rc::new(MockBackend::new());
        let config = GfxConfig {
            descriptor_capacity,
            ..Default::default()
        };
        let ctx = RenderContext::new(backend.clone(), config).unwrap();
        (backend, ctx)
    }

    #[test]
    fn test_uav_points_at_texture() {
        let (backend, ctx) = context(16);
        let output = OutputTexture::new(&ctx, 8, 4, TextureFormat::Rgba8Unorm, "output").unwrap();

        let heap = ctx.descriptor_table().heap();
        assert_eq!(
            backend.descriptor_at(heap, output.uav().index),
            Some(DescriptorView::StorageTexture(output.texture().handle()))
        );
        assert_eq!(output.srv(), None);
        assert_eq!(output.state(), TextureState::Undefined);
    }

    #[test]
    fn test_sampled_has_both_views() {
        let (backend, ctx) = context(16);
        let mut accumulation =
            OutputTexture::new_sampled(&ctx, 8, 4, TextureFormat::Rgba32Float, "accumulation").unwrap();
        assert_eq!(ctx.descriptor_table().allocated(), 2);

        let heap = ctx.descriptor_table().heap();
        let srv = accumulation.srv().unwrap();
        assert_ne!(srv.index, accumulation.uav().index);
        assert_eq!(
            backend.descriptor_at(heap, srv.index),
            Some(DescriptorView::SampledTexture(accumulation.texture().handle()))
        );
        assert!(accumulation.texture().usage().contains(TextureUsage::SAMPLED));

        accumulation.release(&ctx);
        assert_eq!(ctx.descriptor_table().allocated(), 0);
    }

    #[test]
    fn test_resize_reallocates() {
        let (backend, ctx) = context(16);
        let mut output = OutputTexture::new(&ctx, 8, 4, TextureFormat::Rgba8Unorm, "output").unwrap();
        output.set_state(TextureState::CopySrc);
        let allocated = ctx.descriptor_table().allocated();

        output.resize(&ctx, 16, 2).unwrap();
        assert_eq!(output.extent(), (16, 2));
        assert_eq!(output.state(), TextureState::Undefined);
        assert_eq!(ctx.descriptor_table().allocated(), allocated);
        assert_eq!(ctx.allocator().stats().live_textures, 1);

        let heap = ctx.descriptor_table().heap();
        assert_eq!(
            backend.descriptor_at(heap, output.uav().index),
            Some(DescriptorView::StorageTexture(output.texture().handle()))
        );
    }

    #[test]
    fn test_failed_resize_keeps_views() {
        // 只能容纳一个描述符，新的 UAV 分配失败
        let (_backend, ctx) = context(1);
        let mut output = OutputTexture::new(&ctx, 8, 4, TextureFormat::Rgba8Unorm, "output").unwrap();
        let uav = output.uav();

        assert!(matches!(
            output.resize(&ctx, 16, 2),
            Err(GfxError::DescriptorCapacityExceeded { .. })
        ));
        assert_eq!(output.extent(), (8, 4));
        assert_eq!(output.uav(), uav);
        assert_eq!(ctx.descriptor_table().allocated(), 1);
        assert_eq!(ctx.allocator().stats().live_textures, 1);

        // 旧的 UAV 仍然有效，只会被释放一次
        output.release(&ctx);
        assert_eq!(ctx.descriptor_table().allocated(), 0);
    }
}

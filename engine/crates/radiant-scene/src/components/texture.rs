use radiant_gfx::backend::types::TextureFormat;

/// 加载器输出的一张贴图，像素逐行紧密排列，没有 mip
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// 棋盘格，每个格子 cell x cell 个像素
    pub fn checker(name: impl Into<String>, size: u32, cell: u32, even: [u8; 4], odd: [u8; 4]) -> Self {
        let cell = cell.max(1);
        let mut pixels = Vec::with_capacity(size as usize * size as usize * 4);
        for y in 0..size {
            for x in 0..size {
                let color = if (x / cell + y / cell) % 2 == 0 { even } else { odd };
                pixels.extend_from_slice(&color);
            }
        }
        Self {
            name: name.into(),
            width: size,
            height: size,
            format: TextureFormat::Rgba8Unorm,
            pixels,
        }
    }

    /// 返回不合法的原因
    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!("texture extent {}x{} is empty", self.width, self.height));
        }
        let expected = (self.width as u64)
            .checked_mul(self.height as u64)
            .and_then(|texels| texels.checked_mul(self.format.texel_size() as u64));
        match expected {
            Some(expected) if expected == self.pixels.len() as u64 => Ok(()),
            Some(expected) => Err(format!(
                "{}x{} {:?} texture needs {} bytes, got {}",
                self.width,
                self.height,
                self.format,
                expected,
                self.pixels.len()
            )),
            None => Err(format!("{}x{} texture is too large", self.width, self.height)),
        }
    }
}

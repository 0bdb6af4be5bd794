use image::RgbImage;

use crate::error::{Error, Result};

/// 解码后的一帧画面
///
/// 只在解码它的那次迭代内存活；除非被选为幻灯片，指纹计算后即丢弃。
#[derive(Clone)]
pub struct Frame {
    index: u64,
    image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    /// 从原始 RGB24 数据构建帧，长度不匹配时返回解码错误
    pub fn from_rgb(index: u64, width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(Error::Decode {
                index,
                reason: format!(
                    "像素数据长度 {} 与 {}x{} RGB 画面不符（应为 {}）",
                    data.len(),
                    width,
                    height,
                    expected
                ),
            });
        }
        let image = RgbImage::from_raw(width, height, data).ok_or_else(|| Error::Decode {
            index,
            reason: "无法构建 RGB 图像缓冲区".to_string(),
        })?;
        Ok(Self { index, image })
    }

    /// 在源视频中的序号（从 0 开始）
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel_count(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

//! 测试用的合成画面

use image::{Rgb, RgbImage};

use crate::frame::Frame;

/// 32x32 灰度噪声，取值落在 [32, 224)，同一 seed 生成相同画面
pub fn noise_frame(index: u64, seed: u32) -> Frame {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    let image = RgbImage::from_fn(32, 32, |_, _| {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let v = 32 + ((state >> 16) % 192) as u8;
        Rgb([v, v, v])
    });
    Frame::new(index, image)
}

/// 亮度取反，结构上与原画面差异最大
pub fn inverted(frame: &Frame, index: u64) -> Frame {
    let mut image = frame.image().clone();
    for pixel in image.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = 255 - *channel;
        }
    }
    Frame::new(index, image)
}

/// 模拟一页幻灯片：浅色背景、深色标题栏和几个按比例摆放的色块
pub fn slide_frame(index: u64, width: u32, height: u32, variant: u32) -> Frame {
    let w = width as f32;
    let h = height as f32;
    let shift = variant as f32 * 0.3;
    let image = RgbImage::from_fn(width, height, |x, y| {
        let fx = x as f32 / w;
        let fy = y as f32 / h;
        if fy < 0.15 {
            Rgb([30, 40, 90])
        } else if (0.1 + shift..0.45 + shift).contains(&fx) && (0.3..0.8).contains(&fy) {
            Rgb([200, 60, 40])
        } else if (0.6..0.9).contains(&fx) && (0.5..0.9).contains(&fy) {
            Rgb([40, 150, 60])
        } else {
            Rgb([235, 235, 225])
        }
    });
    Frame::new(index, image)
}

pub fn solid_frame(index: u64, width: u32, height: u32, color: [u8; 3]) -> Frame {
    Frame::new(index, RgbImage::from_pixel(width, height, Rgb(color)))
}

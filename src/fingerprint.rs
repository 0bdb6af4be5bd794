use std::fmt;
use std::sync::Arc;

use image::imageops::{self, FilterType};
use rustdct::{Dct2, DctPlanner, TransformType2And3};

use crate::error::{Error, Result};
use crate::frame::Frame;

/// 下采样边长
const SAMPLE_SIZE: usize = 32;
/// 保留的低频块边长
const BLOCK_SIZE: usize = 8;

/// 64 位感知哈希，两两之间用汉明距离比较
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub const BITS: u32 = 64;

    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn hamming_distance(&self, other: &Fingerprint) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// 把一帧画面转换成指纹
pub trait Fingerprinter {
    fn fingerprint(&self, frame: &Frame) -> Result<Fingerprint>;
}

/// 基于 DCT 的感知哈希（pHash）
///
/// 灰度化并缩放到 32x32，做二维 DCT-II，取左上角 8x8 低频块，
/// 以去掉直流分量后的中位数为界逐位置 1。对缩放、轻微压缩噪声和
/// 小幅平移不敏感，对版面结构变化敏感。
pub struct DctHasher {
    dct: Arc<dyn TransformType2And3<f32>>,
}

impl DctHasher {
    pub fn new() -> Self {
        let mut planner = DctPlanner::new();
        Self {
            dct: planner.plan_dct2(SAMPLE_SIZE),
        }
    }

    fn low_frequency_block(&self, pixels: &mut [f32]) -> [f32; BLOCK_SIZE * BLOCK_SIZE] {
        // 先按行变换，转置后再按行变换一次即得到二维 DCT
        for row in pixels.chunks_exact_mut(SAMPLE_SIZE) {
            self.dct.process_dct2(row);
        }
        transpose_square(pixels, SAMPLE_SIZE);
        for row in pixels.chunks_exact_mut(SAMPLE_SIZE) {
            self.dct.process_dct2(row);
        }
        transpose_square(pixels, SAMPLE_SIZE);

        let mut block = [0f32; BLOCK_SIZE * BLOCK_SIZE];
        for v in 0..BLOCK_SIZE {
            for u in 0..BLOCK_SIZE {
                block[v * BLOCK_SIZE + u] = pixels[v * SAMPLE_SIZE + u];
            }
        }
        block
    }
}

impl Default for DctHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DctHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DctHasher")
            .field("sample_size", &SAMPLE_SIZE)
            .field("block_size", &BLOCK_SIZE)
            .finish()
    }
}

impl Fingerprinter for DctHasher {
    fn fingerprint(&self, frame: &Frame) -> Result<Fingerprint> {
        if frame.pixel_count() == 0 {
            return Err(Error::Decode {
                index: frame.index(),
                reason: format!("画面面积为零 ({}x{})", frame.width(), frame.height()),
            });
        }

        let gray = imageops::grayscale(frame.image());
        let small = imageops::resize(
            &gray,
            SAMPLE_SIZE as u32,
            SAMPLE_SIZE as u32,
            FilterType::Lanczos3,
        );
        let mut pixels: Vec<f32> = small.pixels().map(|p| p[0] as f32).collect();

        let block = self.low_frequency_block(&mut pixels);
        let median = median_without_dc(&block);

        let mut bits = 0u64;
        for (i, &coefficient) in block.iter().enumerate() {
            if coefficient > median {
                bits |= 1 << (63 - i);
            }
        }
        Ok(Fingerprint(bits))
    }
}

fn transpose_square(data: &mut [f32], size: usize) {
    for y in 0..size {
        for x in (y + 1)..size {
            data.swap(y * size + x, x * size + y);
        }
    }
}

fn median_without_dc(block: &[f32; BLOCK_SIZE * BLOCK_SIZE]) -> f32 {
    let mut ac: Vec<f32> = block[1..].to_vec();
    ac.sort_by(|a, b| a.total_cmp(b));
    ac[ac.len() / 2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{inverted, noise_frame, slide_frame};
    use image::RgbImage;

    #[test]
    fn test_hamming_distance() {
        let a = Fingerprint::from_bits(0b1111_0000);
        let b = Fingerprint::from_bits(0b1111_0000);
        assert_eq!(a.hamming_distance(&b), 0);

        let c = Fingerprint::from_bits(0);
        let d = Fingerprint::from_bits(u64::MAX);
        assert_eq!(c.hamming_distance(&d), 64);
    }

    #[test]
    fn test_display_is_fixed_width_hex() {
        assert_eq!(Fingerprint::from_bits(0xab).to_string(), "00000000000000ab");
    }

    #[test]
    fn test_identical_frames_hash_identically() {
        let hasher = DctHasher::new();
        let a = hasher.fingerprint(&noise_frame(0, 7)).unwrap();
        let b = hasher.fingerprint(&noise_frame(9, 7)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_call_order_does_not_matter() {
        let hasher = DctHasher::new();
        let first = hasher.fingerprint(&noise_frame(0, 1)).unwrap();
        hasher.fingerprint(&noise_frame(1, 2)).unwrap();
        let again = hasher.fingerprint(&noise_frame(2, 1)).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn test_inverted_content_is_far_apart() {
        let hasher = DctHasher::new();
        let frame = noise_frame(0, 3);
        let a = hasher.fingerprint(&frame).unwrap();
        let b = hasher.fingerprint(&inverted(&frame, 1)).unwrap();
        assert!(a.hamming_distance(&b) > 40, "distance {}", a.hamming_distance(&b));
    }

    #[test]
    fn test_resized_slide_stays_close() {
        let hasher = DctHasher::new();
        let small = hasher.fingerprint(&slide_frame(0, 160, 120, 0)).unwrap();
        let large = hasher.fingerprint(&slide_frame(1, 640, 480, 0)).unwrap();
        assert!(small.hamming_distance(&large) <= 12);
    }

    #[test]
    fn test_zero_area_frame_is_decode_error() {
        let hasher = DctHasher::new();
        let err = hasher.fingerprint(&Frame::new(12, RgbImage::new(0, 10))).unwrap_err();
        match err {
            Error::Decode { index, .. } => assert_eq!(index, 12),
            other => panic!("unexpected error: {other}"),
        }
    }
}

use std::fmt;
use std::str::FromStr;

use image::RgbImage;
use tracing::info;

use crate::error::{Error, Result};
use crate::extractor::ExtractionResult;
use crate::fingerprint::Fingerprint;

/// 4:3 画布，10in x 7.5in
pub const STANDARD_CANVAS: (u64, u64) = (9_144_000, 6_858_000);
/// 16:9 画布，13.333in x 7.5in
pub const WIDESCREEN_CANVAS: (u64, u64) = (12_192_000, 6_858_000);
/// PowerPoint 接受的幻灯片边长范围（1in - 56in）
pub const SLIDE_EDGE_RANGE: std::ops::RangeInclusive<u64> = 914_400..=51_206_400;

/// 图片在画布上的高度策略，整份演示文稿只用一种
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalePolicy {
    /// 宽度铺满，高度按原图比例，超出画布底部的部分被裁掉
    #[default]
    Proportional,
    /// 铺满整个画布，不保持比例
    Stretch,
}

impl FromStr for ScalePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proportional" => Ok(ScalePolicy::Proportional),
            "stretch" => Ok(ScalePolicy::Stretch),
            other => Err(Error::config(format!(
                "未知的缩放策略: {other}（可选 proportional / stretch）"
            ))),
        }
    }
}

impl fmt::Display for ScalePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalePolicy::Proportional => f.write_str("proportional"),
            ScalePolicy::Stretch => f.write_str("stretch"),
        }
    }
}

/// 画布尺寸（EMU）与缩放策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasSpec {
    width_emu: u64,
    height_emu: u64,
    policy: ScalePolicy,
}

impl CanvasSpec {
    pub fn new(width_emu: u64, height_emu: u64) -> Result<Self> {
        if !SLIDE_EDGE_RANGE.contains(&width_emu) || !SLIDE_EDGE_RANGE.contains(&height_emu) {
            return Err(Error::config(format!(
                "画布尺寸超出范围: {width_emu}x{height_emu}（每边须在 {}-{} EMU 之间）",
                SLIDE_EDGE_RANGE.start(),
                SLIDE_EDGE_RANGE.end()
            )));
        }
        Ok(Self {
            width_emu,
            height_emu,
            policy: ScalePolicy::default(),
        })
    }

    pub fn standard() -> Self {
        Self {
            width_emu: STANDARD_CANVAS.0,
            height_emu: STANDARD_CANVAS.1,
            policy: ScalePolicy::default(),
        }
    }

    pub fn widescreen() -> Self {
        Self {
            width_emu: WIDESCREEN_CANVAS.0,
            height_emu: WIDESCREEN_CANVAS.1,
            policy: ScalePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ScalePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn width_emu(&self) -> u64 {
        self.width_emu
    }

    pub fn height_emu(&self) -> u64 {
        self.height_emu
    }

    pub fn policy(&self) -> ScalePolicy {
        self.policy
    }

    /// 计算一张 `width` x `height` 像素的图片在画布上的位置
    pub fn place(&self, width: u32, height: u32) -> Result<Placement> {
        if width == 0 || height == 0 {
            return Err(Error::MalformedDocument(format!(
                "无法放置空图片: {width}x{height}"
            )));
        }
        let cy = match self.policy {
            ScalePolicy::Proportional => {
                // u128 防止 EMU 与像素相乘溢出
                let scaled = (self.width_emu as u128 * height as u128 + width as u128 / 2)
                    / width as u128;
                u64::try_from(scaled).map_err(|_| {
                    Error::MalformedDocument(format!(
                        "图片高度超出 EMU 表示范围: {width}x{height}"
                    ))
                })?
            }
            ScalePolicy::Stretch => self.height_emu,
        };
        Ok(Placement {
            x: 0,
            y: 0,
            cx: self.width_emu,
            cy,
        })
    }
}

impl Default for CanvasSpec {
    fn default() -> Self {
        Self::standard()
    }
}

/// 支持 `4:3`、`16:9` 以及 `宽x高`（EMU）
impl FromStr for CanvasSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            "4:3" => return Ok(Self::standard()),
            "16:9" => return Ok(Self::widescreen()),
            _ => {}
        }

        let parsed = s
            .split_once(['x', 'X'])
            .and_then(|(w, h)| Some((w.trim().parse::<u64>().ok()?, h.trim().parse::<u64>().ok()?)));
        match parsed {
            Some((w, h)) => Self::new(w, h),
            None => Err(Error::config(format!(
                "无法识别的画布: {s}（可选 4:3 / 16:9 / 宽x高）"
            ))),
        }
    }
}

impl fmt::Display for CanvasSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.width_emu, self.height_emu) {
            STANDARD_CANVAS => f.write_str("4:3"),
            WIDESCREEN_CANVAS => f.write_str("16:9"),
            (w, h) => write!(f, "{w}x{h}"),
        }
    }
}

/// 图片位置，单位 EMU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: u64,
    pub y: u64,
    pub cx: u64,
    pub cy: u64,
}

#[derive(Debug, Clone)]
pub struct SlideEntry {
    image: RgbImage,
    frame_index: u64,
    fingerprint: Fingerprint,
    placement: Placement,
}

impl SlideEntry {
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }
}

/// 逐页接收图片并最终产出文档字节的编码器
pub trait DeckEncoder {
    fn append_image_slide(&mut self, image: &RgbImage, placement: &Placement) -> Result<()>;

    fn save(self) -> Result<Vec<u8>>
    where
        Self: Sized;
}

/// 待编码的演示文稿
#[derive(Debug, Clone)]
pub struct Deck {
    canvas: CanvasSpec,
    entries: Vec<SlideEntry>,
}

impl Deck {
    pub fn canvas(&self) -> &CanvasSpec {
        &self.canvas
    }

    pub fn entries(&self) -> &[SlideEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按顺序把每页交给编码器，图片送入后即释放
    pub fn encode<E: DeckEncoder>(self, mut encoder: E) -> Result<Vec<u8>> {
        for entry in self.entries {
            encoder.append_image_slide(&entry.image, &entry.placement)?;
        }
        encoder.save()
    }
}

/// 把提取结果组装成一页一图的演示文稿
pub struct DeckAssembler;

impl DeckAssembler {
    pub fn assemble(result: ExtractionResult, canvas: CanvasSpec) -> Result<Deck> {
        if result.slides_found() == 0 {
            return Err(Error::EmptyDeck);
        }

        let entries = result
            .into_slides()
            .into_iter()
            .map(|candidate| {
                let frame_index = candidate.frame_index();
                let fingerprint = candidate.fingerprint();
                let image = candidate.into_frame().into_image();
                let placement = canvas.place(image.width(), image.height())?;
                Ok(SlideEntry {
                    image,
                    frame_index,
                    fingerprint,
                    placement,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            "🗂️ [组装] {} 页，画布 {}（{}x{} EMU），缩放策略 {}",
            entries.len(),
            canvas,
            canvas.width_emu,
            canvas.height_emu,
            canvas.policy
        );

        Ok(Deck { canvas, entries })
    }
}

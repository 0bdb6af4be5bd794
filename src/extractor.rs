use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info};

use crate::change_detector::{ChangeDetector, Decision};
use crate::error::Error;
use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::frame::Frame;
use crate::frame_source::FrameSource;

/// 默认采样间隔（帧）
pub const DEFAULT_SAMPLE_INTERVAL: u64 = 60;
/// 默认每采样多少帧报告一次进度
pub const DEFAULT_PROGRESS_EVERY: u64 = 5;

/// 被接受的一页
#[derive(Debug, Clone)]
pub struct SlideCandidate {
    frame: Frame,
    fingerprint: Fingerprint,
    frame_index: u64,
}

impl SlideCandidate {
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }
}

/// 提取结果，顺序即首次出现的时间顺序
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    slides: Vec<SlideCandidate>,
    frames_scanned: u64,
    frames_sampled: u64,
    total_frames: Option<u64>,
    frame_rate: Option<f64>,
}

impl ExtractionResult {
    pub fn slides(&self) -> &[SlideCandidate] {
        &self.slides
    }

    pub fn into_slides(self) -> Vec<SlideCandidate> {
        self.slides
    }

    pub fn slides_found(&self) -> usize {
        self.slides.len()
    }

    pub fn frames_scanned(&self) -> u64 {
        self.frames_scanned
    }

    pub fn frames_sampled(&self) -> u64 {
        self.frames_sampled
    }

    pub fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    pub fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }

    /// 帧序号对应的时间（秒），帧率未知时为 None
    pub fn timestamp_of(&self, frame_index: u64) -> Option<f64> {
        self.frame_rate
            .filter(|fps| *fps > 0.0)
            .map(|fps| frame_index as f64 / fps)
    }
}

/// 提取中断：错误本身以及截至中断时已累积的结果
///
/// 部分结果内部一致（不会有半成品），是否采用由调用方决定。
#[derive(Debug, Error)]
#[error("{error}")]
pub struct PartialExtraction {
    #[source]
    pub error: Error,
    pub partial: ExtractionResult,
}

/// 进度快照
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub frames_processed: u64,
    pub total_frames: Option<u64>,
    pub slides_found: usize,
}

impl Progress {
    /// 0.0-1.0，总帧数未知时为 None
    pub fn fraction(&self) -> Option<f64> {
        self.total_frames
            .filter(|total| *total > 0)
            .map(|total| (self.frames_processed as f64 / total as f64).min(1.0))
    }
}

/// 协作式取消标记，可在其他线程中触发
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// 关键帧提取器
///
/// 单次前向遍历帧源，每 `sample_interval` 帧取一帧计算指纹并交给换页检测器，
/// 判定严格按帧序串行进行。
pub struct KeyframeExtractor<'a> {
    sample_interval: u64,
    progress_every: u64,
    on_progress: Option<Box<dyn FnMut(Progress) + 'a>>,
    cancel: Option<CancelToken>,
}

impl<'a> KeyframeExtractor<'a> {
    /// 采样间隔必须 ≥ 1，不会被静默修正
    pub fn new(sample_interval: u64) -> Result<Self, Error> {
        if sample_interval == 0 {
            return Err(Error::config("sample_interval 必须是正整数"));
        }
        Ok(Self {
            sample_interval,
            progress_every: DEFAULT_PROGRESS_EVERY,
            on_progress: None,
            cancel: None,
        })
    }

    /// 每采样 `every` 帧回调一次
    pub fn progress_every(mut self, every: u64) -> Result<Self, Error> {
        if every == 0 {
            return Err(Error::config("progress_every 必须是正整数"));
        }
        self.progress_every = every;
        Ok(self)
    }

    pub fn on_progress(mut self, callback: impl FnMut(Progress) + 'a) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn extract<S, F>(
        &mut self,
        source: &mut S,
        detector: &mut ChangeDetector,
        fingerprinter: &F,
    ) -> Result<ExtractionResult, PartialExtraction>
    where
        S: FrameSource + ?Sized,
        F: Fingerprinter + ?Sized,
    {
        let start = Instant::now();
        let mut result = ExtractionResult {
            total_frames: source.frame_count(),
            frame_rate: source.frame_rate(),
            ..Default::default()
        };

        info!(
            "⏳ [关键帧提取] 开始提取（采样间隔: {} 帧, 阈值: {}, 总帧数: {:?}）",
            self.sample_interval,
            detector.threshold(),
            result.total_frames
        );

        let mut index: u64 = 0;
        loop {
            if index % self.sample_interval == 0 {
                if self.is_cancelled() {
                    let frames_scanned = result.frames_scanned;
                    return Err(PartialExtraction {
                        error: Error::Cancelled { frames_scanned },
                        partial: result,
                    });
                }

                let frame = match source.next_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => return Err(source_failure(e, index, result)),
                };

                let fingerprint = match fingerprinter.fingerprint(&frame) {
                    Ok(fingerprint) => fingerprint,
                    Err(error) => {
                        return Err(PartialExtraction {
                            error,
                            partial: result,
                        })
                    }
                };

                if detector.evaluate(fingerprint) == Decision::Accept {
                    debug!(
                        "📸 [关键帧提取] 第 {} 页: 帧 {} (指纹 {})",
                        result.slides.len() + 1,
                        index,
                        fingerprint
                    );
                    result.slides.push(SlideCandidate {
                        frame,
                        fingerprint,
                        frame_index: index,
                    });
                }

                result.frames_sampled += 1;
                result.frames_scanned = index + 1;
                if result.frames_sampled % self.progress_every == 0 {
                    self.report(&result);
                }
            } else {
                match source.skip_frame() {
                    Ok(true) => result.frames_scanned = index + 1,
                    Ok(false) => break,
                    Err(e) => return Err(source_failure(e, index, result)),
                }
            }

            index += 1;
        }

        self.report(&result);

        let elapsed = start.elapsed();
        info!(
            "✅ [关键帧提取] 完成，耗时: {:.2}秒，扫描 {} 帧，采样 {} 帧，检测到 {} 页",
            elapsed.as_secs_f64(),
            result.frames_scanned,
            result.frames_sampled,
            result.slides.len()
        );

        Ok(result)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|token| token.is_cancelled())
    }

    fn report(&mut self, result: &ExtractionResult) {
        if let Some(callback) = self.on_progress.as_mut() {
            callback(Progress {
                frames_processed: result.frames_scanned,
                total_frames: result.total_frames,
                slides_found: result.slides.len(),
            });
        }
    }
}

fn source_failure(e: anyhow::Error, index: u64, partial: ExtractionResult) -> PartialExtraction {
    PartialExtraction {
        error: Error::SourceRead {
            last_good: index.checked_sub(1),
            source: e.into(),
        },
        partial,
    }
}

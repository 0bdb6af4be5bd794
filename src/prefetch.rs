// 解码预取：后台线程持有解码器，按帧序把结果送入有界通道，
// 提取线程只负责指纹计算和判定，判定顺序不受影响。

use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::error::Error;
use crate::frame::Frame;
use crate::frame_source::FrameSource;

/// 默认预取深度
pub const DEFAULT_PREFETCH_DEPTH: usize = 2;

enum Slot {
    Frame(Frame),
    Skipped(u64),
    End,
    Failed(anyhow::Error),
}

/// 在后台线程解码的帧源
///
/// 后台线程按与提取器相同的采样间隔决定哪些帧需要像素，
/// 其余帧只解码不转换。
pub struct PrefetchSource {
    rx: Option<Receiver<Slot>>,
    worker: Option<JoinHandle<()>>,
    frame_count: Option<u64>,
    frame_rate: Option<f64>,
    finished: bool,
}

impl PrefetchSource {
    /// 启动预取线程。解码器必须在线程内部创建（FFmpeg 缩放器不能跨线程移动）。
    ///
    /// `sample_interval` 必须与提取器一致，且不能为 0。
    pub fn spawn<S, F>(open: F, sample_interval: u64, depth: usize) -> Result<Self>
    where
        S: FrameSource + 'static,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        if sample_interval == 0 {
            return Err(Error::config("sample_interval 必须是正整数").into());
        }
        let (info_tx, info_rx) = channel::bounded::<Result<(Option<u64>, Option<f64>)>>(1);
        let (tx, rx) = channel::bounded::<Slot>(depth.max(1));

        let worker = thread::Builder::new()
            .name("frame-prefetch".to_string())
            .spawn(move || {
                let mut source = match open() {
                    Ok(source) => {
                        let _ = info_tx.send(Ok((source.frame_count(), source.frame_rate())));
                        source
                    }
                    Err(e) => {
                        let _ = info_tx.send(Err(e));
                        return;
                    }
                };
                prefetch_loop(&mut source, &tx, sample_interval);
            })
            .context("无法启动解码预取线程")?;

        let (frame_count, frame_rate) = match info_rx.recv() {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                anyhow::bail!("解码预取线程意外退出");
            }
        };

        Ok(Self {
            rx: Some(rx),
            worker: Some(worker),
            frame_count,
            frame_rate,
            finished: false,
        })
    }

    fn recv(&mut self) -> Result<Slot> {
        if self.finished {
            return Ok(Slot::End);
        }
        let rx = self.rx.as_ref().context("预取通道已关闭")?;
        match rx.recv() {
            Ok(slot) => {
                if matches!(slot, Slot::End | Slot::Failed(_)) {
                    self.finished = true;
                }
                Ok(slot)
            }
            Err(_) => {
                self.finished = true;
                anyhow::bail!("解码预取线程意外退出")
            }
        }
    }
}

fn prefetch_loop<S: FrameSource>(source: &mut S, tx: &Sender<Slot>, sample_interval: u64) {
    let mut index = 0u64;
    loop {
        let slot = if index % sample_interval == 0 {
            match source.next_frame() {
                Ok(Some(frame)) => Slot::Frame(frame),
                Ok(None) => Slot::End,
                Err(e) => Slot::Failed(e),
            }
        } else {
            match source.skip_frame() {
                Ok(true) => Slot::Skipped(index),
                Ok(false) => Slot::End,
                Err(e) => Slot::Failed(e),
            }
        };

        let done = matches!(slot, Slot::End | Slot::Failed(_));
        // 接收端已丢弃（取消或失败）时直接退出
        if tx.send(slot).is_err() || done {
            return;
        }
        index += 1;
    }
}

impl FrameSource for PrefetchSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.recv()? {
            Slot::Frame(frame) => Ok(Some(frame)),
            Slot::Skipped(index) => {
                anyhow::bail!("第 {} 帧已被预取线程跳过，采样间隔不一致", index)
            }
            Slot::End => Ok(None),
            Slot::Failed(e) => Err(e),
        }
    }

    fn skip_frame(&mut self) -> Result<bool> {
        match self.recv()? {
            Slot::Frame(_) | Slot::Skipped(_) => Ok(true),
            Slot::End => Ok(false),
            Slot::Failed(e) => Err(e),
        }
    }

    fn frame_count(&self) -> Option<u64> {
        self.frame_count
    }

    fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }
}

impl Drop for PrefetchSource {
    fn drop(&mut self) {
        // 先关闭接收端，让阻塞在发送上的线程退出，再等待它结束
        drop(self.rx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_detector::ChangeDetector;
    use crate::extractor::{ExtractionResult, KeyframeExtractor};
    use crate::fingerprint::DctHasher;
    use crate::frame_source::MemorySource;
    use crate::test_support::{inverted, noise_frame, solid_frame};

    fn frames(n: u64) -> Vec<Frame> {
        (0..n).map(|i| solid_frame(i, 4, 4, [i as u8, 0, 0])).collect()
    }

    #[test]
    fn test_prefetch_preserves_order_and_cadence() {
        let mut source =
            PrefetchSource::spawn(|| Ok(MemorySource::new(frames(5)).with_frame_rate(30.0)), 2, 2)
                .unwrap();

        assert_eq!(source.frame_count(), Some(5));
        assert_eq!(source.frame_rate(), Some(30.0));
        assert_eq!(source.next_frame().unwrap().unwrap().index(), 0);
        assert!(source.skip_frame().unwrap());
        assert_eq!(source.next_frame().unwrap().unwrap().index(), 2);
        assert!(source.skip_frame().unwrap());
        assert_eq!(source.next_frame().unwrap().unwrap().index(), 4);
        assert!(source.next_frame().unwrap().is_none());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_prefetch_forwards_decode_failure() {
        let mut source =
            PrefetchSource::spawn(|| Ok(MemorySource::new(frames(5)).failing_at(1)), 1, 2).unwrap();

        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn test_prefetch_open_failure_is_reported() {
        let result = PrefetchSource::spawn(
            || -> Result<MemorySource> { anyhow::bail!("无法打开") },
            1,
            2,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_interval_is_config_error() {
        let result = PrefetchSource::spawn(|| Ok(MemorySource::new(frames(3))), 0, 2);
        let err = result.err().unwrap();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Config(_))));
    }

    fn two_scenes() -> MemorySource {
        let first = noise_frame(0, 11);
        let second = inverted(&first, 0);
        let frames = (0..10)
            .map(|i| {
                let base = if i < 5 { &first } else { &second };
                Frame::new(i, base.image().clone())
            })
            .collect();
        MemorySource::new(frames)
    }

    fn slide_indices(result: &ExtractionResult) -> Vec<u64> {
        result.slides().iter().map(|s| s.frame_index()).collect()
    }

    #[test]
    fn test_extraction_through_prefetch_matches_direct_read() {
        for interval in [1, 2, 3] {
            let direct = KeyframeExtractor::new(interval)
                .unwrap()
                .extract(&mut two_scenes(), &mut ChangeDetector::new(10), &DctHasher::new())
                .unwrap();

            let mut prefetched = PrefetchSource::spawn(|| Ok(two_scenes()), interval, 2).unwrap();
            let via_prefetch = KeyframeExtractor::new(interval)
                .unwrap()
                .extract(&mut prefetched, &mut ChangeDetector::new(10), &DctHasher::new())
                .unwrap();

            assert_eq!(slide_indices(&via_prefetch), slide_indices(&direct));
            assert_eq!(via_prefetch.frames_scanned(), direct.frames_scanned());
            assert_eq!(via_prefetch.frames_sampled(), direct.frames_sampled());
        }

        let via_prefetch = KeyframeExtractor::new(1)
            .unwrap()
            .extract(
                &mut PrefetchSource::spawn(|| Ok(two_scenes()), 1, 2).unwrap(),
                &mut ChangeDetector::new(10),
                &DctHasher::new(),
            )
            .unwrap();
        assert_eq!(slide_indices(&via_prefetch), vec![0, 5]);
    }

    #[test]
    fn test_dropping_early_does_not_hang() {
        let mut source = PrefetchSource::spawn(|| Ok(MemorySource::new(frames(200))), 1, 2).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        drop(source);
    }
}

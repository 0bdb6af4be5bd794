use std::collections::VecDeque;

use anyhow::Result;

use crate::frame::Frame;

/// 顺序读取解码帧的能力
///
/// 单向、不可回退。`Ok(None)` 表示流结束。
/// 幻灯片的帧序号由提取器按读取次数计数，不读取 [`Frame::index`]。
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// 越过一帧而不需要它的像素，返回是否还有帧
    ///
    /// 解码器实现可以借此跳过像素格式转换。
    fn skip_frame(&mut self) -> Result<bool> {
        Ok(self.next_frame()?.is_some())
    }

    /// 总帧数（容器未记录时为 None）
    fn frame_count(&self) -> Option<u64>;

    fn frame_rate(&self) -> Option<f64> {
        None
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn skip_frame(&mut self) -> Result<bool> {
        (**self).skip_frame()
    }

    fn frame_count(&self) -> Option<u64> {
        (**self).frame_count()
    }

    fn frame_rate(&self) -> Option<f64> {
        (**self).frame_rate()
    }
}

/// 内存中的帧序列，用于合成输入
#[derive(Debug, Default)]
pub struct MemorySource {
    frames: VecDeque<Frame>,
    total: u64,
    frame_rate: Option<f64>,
    fail_at: Option<u64>,
    cursor: u64,
}

impl MemorySource {
    pub fn new(frames: Vec<Frame>) -> Self {
        let total = frames.len() as u64;
        Self {
            frames: frames.into(),
            total,
            frame_rate: None,
            fail_at: None,
            cursor: 0,
        }
    }

    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        self.frame_rate = Some(fps);
        self
    }

    /// 读到指定序号时返回错误，模拟中途解码失败
    pub fn failing_at(mut self, index: u64) -> Self {
        self.fail_at = Some(index);
        self
    }

    fn advance(&mut self) -> Result<Option<Frame>> {
        if self.fail_at == Some(self.cursor) {
            anyhow::bail!("第 {} 帧解码失败", self.cursor);
        }
        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.cursor += 1;
        }
        Ok(frame)
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.advance()
    }

    fn frame_count(&self) -> Option<u64> {
        Some(self.total)
    }

    fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }
}

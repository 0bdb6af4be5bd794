use ffmpeg_next as ffmpeg;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

use crate::frame::Frame;
use crate::frame_source::FrameSource;

/// 基于 FFmpeg 的顺序解码器
///
/// 按解码顺序逐帧输出 RGB24 画面；被跳过的帧只解码不做像素格式转换。
pub struct FfmpegSource {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    decoded: ffmpeg::frame::Video,
    frame_count: Option<u64>,
    frame_rate: Option<f64>,
    next_index: u64,
    draining: bool,
    finished: bool,
}

impl FfmpegSource {
    pub fn open(input_path: impl AsRef<Path>) -> Result<Self> {
        ffmpeg::init().context("初始化 FFmpeg 失败")?;

        // 只保留错误级别的 FFmpeg 日志
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);

        let input_path = input_path.as_ref();
        let input = ffmpeg::format::input(input_path)
            .with_context(|| format!("无法打开视频文件: {}", input_path.display()))?;

        // 先把需要的流信息取出来，避免借用 input
        let (stream_index, parameters, frames, fps) = {
            let stream = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .context("未找到视频流")?;
            let rate = stream.avg_frame_rate();
            let fps = if rate.numerator() > 0 && rate.denominator() > 0 {
                Some(rate.numerator() as f64 / rate.denominator() as f64)
            } else {
                None
            };
            (stream.index(), stream.parameters(), stream.frames(), fps)
        };

        let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)
            .context("无法创建解码器上下文")?
            .decoder()
            .video()
            .context("无法创建视频解码器")?;

        let scaler = Self::create_scaler(&decoder)?;

        // 容器没有记录帧数时按时长估算，仅用于进度显示
        let frame_count = if frames > 0 {
            Some(frames as u64)
        } else {
            let duration = input.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64;
            fps.filter(|_| duration > 0.0)
                .map(|fps| (duration * fps).round() as u64)
        };

        debug!(
            "🎬 [视频源] {} - {}x{}, 帧率: {:?}, 帧数: {:?}",
            input_path.display(),
            decoder.width(),
            decoder.height(),
            fps,
            frame_count
        );

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            decoded: ffmpeg::frame::Video::empty(),
            frame_count,
            frame_rate: fps,
            next_index: 0,
            draining: false,
            finished: false,
        })
    }

    fn create_scaler(decoder: &ffmpeg::codec::decoder::Video) -> Result<ffmpeg::software::scaling::Context> {
        ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .context("无法创建缩放器")
    }

    /// 解码下一帧到 `self.decoded`，流结束时返回 false
    fn decode_next(&mut self) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }

        loop {
            match self.decoder.receive_frame(&mut self.decoded) {
                Ok(()) => return Ok(true),
                Err(ffmpeg::Error::Eof) => {
                    self.finished = true;
                    return Ok(false);
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    if self.draining {
                        self.finished = true;
                        return Ok(false);
                    }
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("解码第 {} 帧失败", self.next_index));
                }
            }

            self.feed_packet()?;
        }
    }

    /// 读取下一个属于视频流的数据包送入解码器，读到文件末尾时冲刷解码器
    fn feed_packet(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        loop {
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() != self.stream_index {
                        continue;
                    }
                    return self
                        .decoder
                        .send_packet(&packet)
                        .with_context(|| format!("送入第 {} 帧附近的数据包失败", self.next_index));
                }
                Err(ffmpeg::Error::Eof) => {
                    self.decoder.send_eof().context("冲刷解码器失败")?;
                    self.draining = true;
                    return Ok(());
                }
                Err(e) => return Err(e).context("读取数据包失败"),
            }
        }
    }

    /// 将解码帧转换为 RGB 画面，处理行对齐
    fn convert_current(&mut self, index: u64) -> Result<Frame> {
        // 分辨率中途变化时重建缩放器
        let definition = self.scaler.input();
        if definition.width != self.decoded.width()
            || definition.height != self.decoded.height()
            || definition.format != self.decoded.format()
        {
            self.scaler = ffmpeg::software::scaling::Context::get(
                self.decoded.format(),
                self.decoded.width(),
                self.decoded.height(),
                ffmpeg::format::Pixel::RGB24,
                self.decoded.width(),
                self.decoded.height(),
                ffmpeg::software::scaling::Flags::BILINEAR,
            )
            .context("无法重建缩放器")?;
        }

        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&self.decoded, &mut rgb_frame)
            .with_context(|| format!("第 {} 帧像素格式转换失败", index))?;

        let width = rgb_frame.width() as usize;
        let height = rgb_frame.height() as usize;
        let stride = rgb_frame.stride(0);
        let data = rgb_frame.data(0);

        let row_bytes = width * 3;
        let mut pixels = Vec::with_capacity(row_bytes * height);
        for y in 0..height {
            let start = y * stride;
            let row = data
                .get(start..start + row_bytes)
                .with_context(|| format!("第 {} 帧像素数据不完整", index))?;
            pixels.extend_from_slice(row);
        }

        Ok(Frame::from_rgb(index, width as u32, height as u32, pixels)?)
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.decode_next()? {
            return Ok(None);
        }
        let index = self.next_index;
        let frame = self.convert_current(index)?;
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn skip_frame(&mut self) -> Result<bool> {
        if !self.decode_next()? {
            return Ok(false);
        }
        self.next_index += 1;
        Ok(true)
    }

    fn frame_count(&self) -> Option<u64> {
        self.frame_count
    }

    fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }
}

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use crate::change_detector::{ChangeDetector, DEFAULT_CHANGE_THRESHOLD};
use crate::deck::{CanvasSpec, DeckAssembler};
use crate::error::Error;
use crate::extractor::{
    CancelToken, KeyframeExtractor, Progress, DEFAULT_PROGRESS_EVERY, DEFAULT_SAMPLE_INTERVAL,
};
use crate::fingerprint::DctHasher;
use crate::frame_source::FrameSource;
use crate::metadata::{DeckManifest, SlideMetadata};
use crate::pptx::{encode_jpeg, PptxWriter, DEFAULT_JPEG_QUALITY};
use crate::prefetch::{PrefetchSource, DEFAULT_PREFETCH_DEPTH};
use crate::video_source::FfmpegSource;

/// 默认输出文件名
pub const DEFAULT_DECK_NAME: &str = "lecture_slides.pptx";

/// 提取配置
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessConfig {
    /// 每隔多少帧采样一次
    pub sample_interval: u64,
    /// 汉明距离严格大于该值视为换页
    pub change_threshold: u32,
    /// 画布与缩放策略
    pub canvas: CanvasSpec,
    pub jpeg_quality: u8,
    /// 每采样多少帧报告一次进度
    pub progress_every: u64,
    /// 是否在后台线程预取解码
    pub prefetch: bool,
    pub log_level: tracing::Level,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            change_threshold: DEFAULT_CHANGE_THRESHOLD,
            canvas: CanvasSpec::standard(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            progress_every: DEFAULT_PROGRESS_EVERY,
            prefetch: true,
            log_level: tracing::Level::INFO,
        }
    }
}

/// 输出选项（只来自命令行）
#[derive(Debug, Clone)]
pub struct OutputOptions {
    /// 演示文稿文件名
    pub deck_name: String,
    /// 同时导出每页的 JPEG
    pub keyframes: bool,
    /// 提取中途失败但已有幻灯片时，使用部分结果
    pub allow_partial: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            deck_name: DEFAULT_DECK_NAME.to_string(),
            keyframes: false,
            allow_partial: false,
        }
    }
}

/// 处理结果
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// 输出目录
    pub output_dir: PathBuf,
    /// 演示文稿路径
    pub deck_path: PathBuf,
    /// 元数据
    pub metadata: DeckManifest,
    /// 关键帧文件列表
    pub keyframe_files: Vec<String>,
}

/// 处理视频文件
pub fn process_video(
    input_video_path: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    config: &ProcessConfig,
    options: &OutputOptions,
    on_progress: impl FnMut(Progress),
    cancel: Option<CancelToken>,
) -> Result<ProcessOutput> {
    let input_video_path = input_video_path.as_ref();

    info!("🎬 [视频源] 打开视频: {}", input_video_path.display());
    let start = Instant::now();
    let mut source: Box<dyn FrameSource> = if config.prefetch {
        let path = input_video_path.to_path_buf();
        Box::new(PrefetchSource::spawn(
            move || FfmpegSource::open(path),
            config.sample_interval,
            DEFAULT_PREFETCH_DEPTH,
        )?)
    } else {
        Box::new(FfmpegSource::open(input_video_path)?)
    };
    info!(
        "✅ [视频源] 打开完成，耗时: {:.2}秒（帧率: {:?}, 帧数: {:?}, 预取: {}）",
        start.elapsed().as_secs_f64(),
        source.frame_rate(),
        source.frame_count(),
        config.prefetch
    );

    process_source(
        &mut source,
        &input_video_path.display().to_string(),
        output_dir,
        config,
        options,
        on_progress,
        cancel,
    )
}

/// 从任意帧源提取幻灯片并写出演示文稿、关键帧和 metadata.json
pub fn process_source<S: FrameSource + ?Sized>(
    source: &mut S,
    input_label: &str,
    output_dir: impl AsRef<Path>,
    config: &ProcessConfig,
    options: &OutputOptions,
    on_progress: impl FnMut(Progress),
    cancel: Option<CancelToken>,
) -> Result<ProcessOutput> {
    let output_dir = output_dir.as_ref();
    let total_start = Instant::now();

    // 1. 提取关键帧
    let mut extractor = KeyframeExtractor::new(config.sample_interval)?
        .progress_every(config.progress_every)?
        .on_progress(on_progress);
    if let Some(token) = cancel {
        extractor = extractor.with_cancel_token(token);
    }
    let mut detector = ChangeDetector::new(config.change_threshold);

    let (result, partial) = match extractor.extract(source, &mut detector, &DctHasher::new()) {
        Ok(result) => (result, false),
        Err(failure) if options.allow_partial && failure.partial.slides_found() > 0 => {
            warn!(
                "⚠️ [关键帧提取] 提取中断: {}，使用已得到的 {} 页",
                failure.error,
                failure.partial.slides_found()
            );
            (failure.partial, true)
        }
        Err(failure) => {
            if failure.partial.slides_found() > 0 {
                warn!(
                    "⚠️ [关键帧提取] 已得到 {} 页，可使用 --allow-partial 保留部分结果",
                    failure.partial.slides_found()
                );
            }
            return Err(failure.error).context("提取关键帧失败");
        }
    };

    let frames_scanned = result.frames_scanned();
    let frames_sampled = result.frames_sampled();
    let total_frames = result.total_frames();
    let fps = result.frame_rate();
    let timestamps: Vec<Option<f64>> = result
        .slides()
        .iter()
        .map(|s| result.timestamp_of(s.frame_index()))
        .collect();

    // 2. 组装
    let deck = match DeckAssembler::assemble(result, config.canvas) {
        Err(Error::EmptyDeck) => {
            return Err(Error::EmptyDeck).with_context(|| format!("{} 中没有检测到幻灯片", input_label))
        }
        other => other?,
    };

    // 有内容可写时才创建输出目录
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("创建输出目录失败: {}", output_dir.display()))?;

    // 3. 导出关键帧
    let mut keyframe_files = Vec::new();
    if options.keyframes {
        let stage = Instant::now();
        for (i, entry) in deck.entries().iter().enumerate() {
            let file_name = format!("slide_{:04}.jpg", i + 1);
            let path = output_dir.join(&file_name);
            let jpeg = encode_jpeg(entry.image(), config.jpeg_quality)?;
            std::fs::write(&path, jpeg)
                .with_context(|| format!("保存关键帧失败: {}", path.display()))?;
            keyframe_files.push(file_name);
        }
        info!(
            "✅ [关键帧] 导出 {} 张，耗时: {:.2}秒",
            keyframe_files.len(),
            stage.elapsed().as_secs_f64()
        );
    }

    let slides: Vec<SlideMetadata> = deck
        .entries()
        .iter()
        .zip(timestamps)
        .enumerate()
        .map(|(i, (entry, timestamp))| SlideMetadata {
            slide_number: i + 1,
            frame_index: entry.frame_index(),
            timestamp,
            fingerprint: entry.fingerprint().to_string(),
            keyframe_file: keyframe_files.get(i).cloned(),
        })
        .collect();

    // 4. 编码演示文稿
    let stage = Instant::now();
    let title = Path::new(input_label)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Lecture Slides".to_string());
    let writer = PptxWriter::new(&config.canvas, config.jpeg_quality)?.with_title(title);
    let bytes = deck.encode(writer).context("生成演示文稿失败")?;

    let deck_path = output_dir.join(&options.deck_name);
    std::fs::write(&deck_path, &bytes)
        .with_context(|| format!("写入演示文稿失败: {}", deck_path.display()))?;
    info!(
        "✅ [PPTX] {} 页写入 {}（{} 字节），耗时: {:.2}秒",
        slides.len(),
        deck_path.display(),
        bytes.len(),
        stage.elapsed().as_secs_f64()
    );

    // 5. 写出元数据
    let metadata = DeckManifest {
        input_video: input_label.to_string(),
        deck_file: options.deck_name.clone(),
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        fps,
        total_frames,
        frames_scanned,
        frames_sampled,
        sample_interval: config.sample_interval,
        change_threshold: config.change_threshold,
        canvas: config.canvas.to_string(),
        scale_policy: config.canvas.policy().to_string(),
        partial,
        slide_count: slides.len(),
        slides,
    };

    let metadata_path = output_dir.join("metadata.json");
    let metadata_json = serde_json::to_string_pretty(&metadata).context("序列化元数据失败")?;
    std::fs::write(&metadata_path, metadata_json)
        .with_context(|| format!("保存元数据失败: {}", metadata_path.display()))?;

    info!(
        "🎉 [完成] 共 {} 页，扫描 {} 帧，总耗时: {:.2}秒",
        metadata.slide_count,
        frames_scanned,
        total_start.elapsed().as_secs_f64()
    );

    Ok(ProcessOutput {
        output_dir: output_dir.to_path_buf(),
        deck_path,
        metadata,
        keyframe_files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::frame_source::MemorySource;
    use crate::pptx::PptxReader;
    use crate::test_support::{inverted, noise_frame};

    fn two_scenes(fps: f64) -> MemorySource {
        let first = noise_frame(0, 21);
        let second = inverted(&first, 0);
        let frames = (0..12)
            .map(|i| {
                let base = if i < 6 { &first } else { &second };
                Frame::new(i, base.image().clone())
            })
            .collect();
        MemorySource::new(frames).with_frame_rate(fps)
    }

    fn config(sample_interval: u64) -> ProcessConfig {
        ProcessConfig {
            sample_interval,
            change_threshold: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_process_source_writes_deck_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let options = OutputOptions {
            keyframes: true,
            ..Default::default()
        };

        let output = process_source(
            &mut two_scenes(2.0),
            "talk.mp4",
            dir.path(),
            &config(3),
            &options,
            |_| {},
            None,
        )
        .unwrap();

        assert_eq!(output.deck_path, dir.path().join(DEFAULT_DECK_NAME));
        assert_eq!(output.keyframe_files, vec!["slide_0001.jpg", "slide_0002.jpg"]);
        for file in &output.keyframe_files {
            assert!(dir.path().join(file).exists());
        }

        let metadata = &output.metadata;
        assert_eq!(metadata.slide_count, 2);
        assert_eq!(metadata.frames_scanned, 12);
        assert_eq!(metadata.frames_sampled, 4);
        assert!(!metadata.partial);
        let indices: Vec<u64> = metadata.slides.iter().map(|s| s.frame_index).collect();
        assert_eq!(indices, vec![0, 6]);
        assert_eq!(metadata.slides[1].timestamp, Some(3.0));

        let json = std::fs::read_to_string(dir.path().join("metadata.json")).unwrap();
        let parsed: DeckManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(&parsed, metadata);

        let bytes = std::fs::read(&output.deck_path).unwrap();
        let deck = PptxReader::new(bytes).unwrap().read().unwrap();
        assert_eq!(deck.slides.len(), 2);
    }

    #[test]
    fn test_empty_source_is_empty_deck_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let err = process_source(
            &mut MemorySource::new(Vec::new()),
            "empty.mp4",
            &out,
            &config(1),
            &OutputOptions::default(),
            |_| {},
            None,
        )
        .unwrap_err();

        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::EmptyDeck)));
        assert!(!out.exists());
    }

    #[test]
    fn test_partial_result_needs_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        let err = process_source(
            &mut two_scenes(30.0).failing_at(8),
            "broken.mp4",
            dir.path().join("failed"),
            &config(1),
            &OutputOptions::default(),
            |_| {},
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::SourceRead { last_good: Some(7), .. })
        ));
        assert!(!dir.path().join("failed").exists());

        let options = OutputOptions {
            allow_partial: true,
            deck_name: "partial.pptx".to_string(),
            ..Default::default()
        };
        let output = process_source(
            &mut two_scenes(30.0).failing_at(8),
            "broken.mp4",
            dir.path(),
            &config(1),
            &options,
            |_| {},
            None,
        )
        .unwrap();
        assert!(output.metadata.partial);
        assert_eq!(output.metadata.slide_count, 2);
        assert_eq!(output.metadata.frames_scanned, 8);
        assert!(dir.path().join("partial.pptx").exists());
    }

    #[test]
    fn test_progress_reaches_final_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut last = None;
        process_source(
            &mut two_scenes(30.0),
            "talk.mp4",
            dir.path(),
            &config(2),
            &OutputOptions::default(),
            |p| last = Some(p),
            None,
        )
        .unwrap();

        let last = last.unwrap();
        assert_eq!(last.frames_processed, 12);
        assert_eq!(last.total_frames, Some(12));
        assert_eq!(last.slides_found, 2);
    }
}

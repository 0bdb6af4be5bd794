use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use lecture_deck::{config::ConfigLoader, process_video, ConfigLayer, OutputOptions, Progress};
use std::path::PathBuf;

/// 讲座视频转幻灯片 - 检测画面换页，每页保留一帧，生成 PowerPoint
#[derive(Parser, Debug)]
#[command(name = "lecture-deck", version)]
#[command(about = "从讲座录像中提取幻灯片并生成 .pptx", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 处理本地视频文件
    Extract(ExtractArgs),
    /// 写出默认配置文件
    InitConfig {
        /// 配置文件路径
        #[arg(default_value = "lecture-deck.ini")]
        path: PathBuf,

        /// 覆盖已存在的文件
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// 输入视频文件路径
    #[arg(short, long)]
    input: PathBuf,

    /// 输出目录
    #[arg(short, long, default_value = "./output")]
    output: PathBuf,

    /// 输出的演示文稿文件名
    #[arg(long, default_value = lecture_deck::processor::DEFAULT_DECK_NAME)]
    deck_name: String,

    /// 配置文件路径（可选，支持 .ini 格式）
    /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    #[arg(long)]
    config: Option<PathBuf>,

    /// 每隔多少帧采样一次（正整数）
    /// 可通过环境变量 LECTURE_DECK_SAMPLE_INTERVAL 或配置文件设置
    #[arg(long, allow_hyphen_values = true)]
    sample_interval: Option<i64>,

    /// 指纹汉明距离严格大于该值视为换页（非负整数）
    /// 可通过环境变量 LECTURE_DECK_CHANGE_THRESHOLD 或配置文件设置
    #[arg(long, allow_hyphen_values = true)]
    change_threshold: Option<i64>,

    /// 画布：4:3、16:9 或 宽x高（EMU）
    #[arg(long)]
    canvas: Option<String>,

    /// 缩放策略：proportional 或 stretch
    #[arg(long)]
    scale_policy: Option<String>,

    /// JPEG 质量 (1-100)
    #[arg(long, allow_hyphen_values = true)]
    jpeg_quality: Option<i64>,

    /// 关闭后台解码预取
    #[arg(long)]
    no_prefetch: bool,

    /// 日志级别（trace, debug, info, warn, error）
    #[arg(long)]
    log_level: Option<String>,

    /// 同时导出每页的 JPEG
    #[arg(long)]
    keyframes: bool,

    /// 提取中途失败时，使用已得到的幻灯片
    #[arg(long)]
    allow_partial: bool,
}

impl ExtractArgs {
    fn cli_layer(&self) -> ConfigLayer {
        ConfigLayer {
            sample_interval: self.sample_interval.map(|v| v.to_string()),
            change_threshold: self.change_threshold.map(|v| v.to_string()),
            canvas: self.canvas.clone(),
            scale_policy: self.scale_policy.clone(),
            jpeg_quality: self.jpeg_quality.map(|v| v.to_string()),
            progress_every: None,
            prefetch: self.no_prefetch.then(|| "false".to_string()),
            log_level: self.log_level.clone(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Extract(args) => extract(args),
        Commands::InitConfig { path, force } => {
            tracing_subscriber::fmt::init();
            if path.exists() && !force {
                anyhow::bail!("配置文件已存在: {}（使用 --force 覆盖）", path.display());
            }
            ConfigLoader::create_default_config(&path)?;
            tracing::info!("已写出默认配置: {}", path.display());
            Ok(())
        }
    }
}

fn extract(args: ExtractArgs) -> Result<()> {
    // 配置在解码任何帧之前校验
    let config = ConfigLoader::load_config(args.config.as_deref(), args.cli_layer())
        .context("加载配置失败")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    tracing::info!(
        "使用配置: sample_interval={}, change_threshold={}, canvas={}, scale_policy={}, jpeg_quality={}",
        config.sample_interval,
        config.change_threshold,
        config.canvas,
        config.canvas.policy(),
        config.jpeg_quality
    );

    let options = OutputOptions {
        deck_name: args.deck_name,
        keyframes: args.keyframes,
        allow_partial: args.allow_partial,
    };

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} 帧 {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let on_progress = |p: Progress| {
        if let Some(total) = p.total_frames {
            bar.set_length(total.max(p.frames_processed));
        }
        bar.set_position(p.frames_processed);
        bar.set_message(format!("已找到 {} 页", p.slides_found));
    };

    let result = process_video(&args.input, &args.output, &config, &options, on_progress, None);
    bar.finish_and_clear();

    let output = result.context("处理视频失败")?;
    println!(
        "已处理 {} 帧，找到 {} 页 -> {}",
        output.metadata.frames_scanned,
        output.metadata.slide_count,
        output.deck_path.display()
    );

    Ok(())
}

use serde::{Deserialize, Serialize};

/// 单页幻灯片的元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideMetadata {
    /// 页码（从 1 开始）
    pub slide_number: usize,
    /// 源视频中的帧序号（从 0 开始）
    pub frame_index: u64,
    /// 出现时间（秒），帧率未知时为空
    pub timestamp: Option<f64>,
    /// 64 位指纹的十六进制表示
    pub fingerprint: String,
    /// 关键帧图片文件名（未导出时为空）
    pub keyframe_file: Option<String>,
}

/// 一次提取运行的清单，写入 metadata.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckManifest {
    /// 输入视频文件路径
    pub input_video: String,
    /// 生成的演示文稿文件名
    pub deck_file: String,
    /// 生成时间（RFC 3339）
    pub created_at: String,
    /// 视频帧率
    pub fps: Option<f64>,
    /// 容器记录的总帧数
    pub total_frames: Option<u64>,
    /// 实际扫描的帧数
    pub frames_scanned: u64,
    /// 计算了指纹的帧数
    pub frames_sampled: u64,
    pub sample_interval: u64,
    pub change_threshold: u32,
    /// 画布（4:3 / 16:9 / 宽x高）
    pub canvas: String,
    pub scale_policy: String,
    /// 提取中途失败、使用了部分结果
    pub partial: bool,
    pub slide_count: usize,
    pub slides: Vec<SlideMetadata>,
}

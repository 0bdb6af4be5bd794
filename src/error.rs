use thiserror::Error;

/// 幻灯片提取流水线的错误类型
///
/// 所有错误对当前这次运行都是终止性的，内部不做任何重试。
#[derive(Debug, Error)]
pub enum Error {
    /// 帧面积为零或像素数据不可读
    #[error("无法解码第 {index} 帧: {reason}")]
    Decode { index: u64, reason: String },

    /// 视频源在读取过程中失败
    #[error("读取视频源失败（最后成功处理的帧: {}）", describe_index(.last_good))]
    SourceRead {
        last_good: Option<u64>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// 组装时没有任何幻灯片
    #[error("没有检测到任何幻灯片，无法生成空的演示文稿")]
    EmptyDeck,

    /// 配置非法（在解码任何帧之前检测）
    #[error("配置错误: {0}")]
    Config(String),

    /// 调用方请求取消
    #[error("提取已取消（已扫描 {frames_scanned} 帧）")]
    Cancelled { frames_scanned: u64 },

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("图像编码错误: {0}")]
    Image(#[from] image::ImageError),

    #[error("ZIP 打包错误: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// 读回的演示文稿结构不完整
    #[error("演示文稿格式错误: {0}")]
    MalformedDocument(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }
}

fn describe_index(index: &Option<u64>) -> String {
    match index {
        Some(i) => i.to_string(),
        None => "无".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_read_message_includes_last_good_index() {
        let err = Error::SourceRead {
            last_good: Some(41),
            source: "boom".into(),
        };
        assert!(err.to_string().contains("41"));
        assert!(std::error::Error::source(&err).is_some());

        let err = Error::SourceRead {
            last_good: None,
            source: "boom".into(),
        };
        assert!(err.to_string().contains("无"));
    }
}

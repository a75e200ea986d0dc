use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// 错误分类，决定错误的传播范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// 前置条件不满足（空帧序列、维度不匹配等），只影响当前视频，不会自动重试
    Precondition,
    /// 下载、解码或向量库连接等 IO 故障，记为单个视频的失败，批处理继续
    TransientIo,
    /// 配置错误，整个批处理立即终止
    Configuration,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("帧序列为空")]
    EmptyFrameSet,

    #[error("特征向量维度不匹配，期望 {expected}，实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("无效的视频帧: {0}")]
    InvalidFrame(String),

    #[error("文件不存在: {0}")]
    NotFound(String),

    #[error("视频解码失败: {0}")]
    Decode(String),

    #[error("视频下载失败: {0}")]
    Download(String),

    #[error("向量库不可用: {0}")]
    StoreUnavailable(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EmptyFrameSet | Error::DimensionMismatch { .. } | Error::InvalidFrame(_) => {
                ErrorKind::Precondition
            }
            Error::NotFound(_)
            | Error::Decode(_)
            | Error::Download(_)
            | Error::StoreUnavailable(_)
            | Error::Io(_)
            | Error::Json(_) => ErrorKind::TransientIo,
            Error::Configuration(_) => ErrorKind::Configuration,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(Error::EmptyFrameSet.kind(), ErrorKind::Precondition);
        assert_eq!(
            Error::DimensionMismatch { expected: 512, actual: 3 }.kind(),
            ErrorKind::Precondition
        );
        assert_eq!(Error::NotFound("a.mp4".into()).kind(), ErrorKind::TransientIo);
        assert_eq!(Error::StoreUnavailable("closed".into()).kind(), ErrorKind::TransientIo);
        assert_eq!(Error::Configuration("dimension".into()).kind(), ErrorKind::Configuration);
    }
}

use std::io;
use thiserror::Error;

/// 下载过程中的错误
#[derive(Error, Debug)]
pub enum DownloadError {
    /// 用户取消，在进度上报时被发现
    #[error("download cancelled by user")]
    Cancelled,

    /// 传输失败，信息可能含有终端转义序列
    #[error("{0}")]
    Transfer(String),

    #[error("metadata probe failed: {0}")]
    Probe(String),

    #[error("yt-dlp update failed: {0}")]
    Update(String),

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid metadata: {0}")]
    Json(#[from] serde_json::Error),
}

impl DownloadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;

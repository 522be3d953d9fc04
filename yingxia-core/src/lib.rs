pub mod error;
pub mod extractor;
pub mod ffmpeg;
pub mod manager;
pub mod options;
pub mod progress;
pub mod sink;
pub mod task;
pub mod types;
pub mod ytdlp;

pub use error::{DownloadError, DownloadResult};
pub use extractor::{Extractor, ProgressReporter};
pub use ffmpeg::Ffmpeg;
pub use manager::{DEFAULT_MAX_WORKERS, DownloadManager, MAX_WORKERS_RANGE};
pub use options::{CookieSource, DownloadKind, FormatPolicy, JobConfig, Quality};
pub use sink::{ChannelSink, NoopSink, PresentationSink, SinkEvent};
pub use task::TaskHandle;
pub use types::{
    BatchStats, DownloadProgress, ProgressEvent, TaskStatus, VideoMetadata, VideoTask,
};
pub use ytdlp::YtDlp;

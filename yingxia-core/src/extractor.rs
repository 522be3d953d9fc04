use crate::{
    error::{DownloadError, DownloadResult},
    options::JobConfig,
    sink::PresentationSink,
    task::TaskHandle,
    types::{ProgressEvent, VideoMetadata},
};
use async_trait::async_trait;
use std::sync::Arc;

/// 视频解析与下载能力
///
/// 由外部工具（如 yt-dlp）实现。管理器只通过这个接口与之交互。
#[async_trait]
pub trait Extractor: Send + Sync {
    /// 预检元数据，失败不影响下载
    async fn probe(&self, url: &str, config: &JobConfig) -> DownloadResult<Option<VideoMetadata>>;

    /// 执行下载
    ///
    /// 每个进度事件都要交给 `progress.report`。返回 `Err(Cancelled)` 时
    /// 实现方应尽快中止传输并把该错误原样返回。
    async fn transfer(
        &self,
        url: &str,
        config: &JobConfig,
        progress: &ProgressReporter,
    ) -> DownloadResult<()>;
}

/// 进度上报器
///
/// 取消只在 `report` 中检查：取消的延迟等于两次进度上报的间隔，
/// 一直没有进度的传输不会感知到取消。
pub struct ProgressReporter {
    task: TaskHandle,
    sink: Arc<dyn PresentationSink>,
}

impl ProgressReporter {
    pub(crate) fn new(task: TaskHandle, sink: Arc<dyn PresentationSink>) -> Self {
        Self { task, sink }
    }

    /// 上报一次进度
    pub async fn report(&self, event: ProgressEvent) -> DownloadResult<()> {
        if self.task.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let changed = self
            .task
            .update(|task| match &event {
                ProgressEvent::Downloading(progress) => task.apply_progress(progress),
                ProgressEvent::Finished => task.mark_processing(),
            })
            .await;

        if changed {
            self.sink.on_task_changed();
        }
        Ok(())
    }

    pub fn task_id(&self) -> &str {
        self.task.id()
    }
}

use crate::types::{TaskStatus, VideoTask};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 任务句柄
///
/// 工作线程通过句柄写自己的任务，展示层通过句柄读取快照。
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: Arc<str>,
    state: Arc<RwLock<VideoTask>>,
    cancel: CancellationToken,
}

impl TaskHandle {
    pub(crate) fn new(url: String, title: Option<String>) -> Self {
        let id = Uuid::new_v4().to_string();
        let task = VideoTask::new(id.clone(), url, title);
        Self {
            id: id.into(),
            state: Arc::new(RwLock::new(task)),
            cancel: CancellationToken::new(),
        }
    }

    /// 任务 ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 获取任务当前状态的副本
    pub async fn snapshot(&self) -> VideoTask {
        self.state.read().await.clone()
    }

    pub async fn status(&self) -> TaskStatus {
        self.state.read().await.status
    }

    /// 是否已请求取消
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 请求取消
    ///
    /// 尚未开始的任务直接进入取消状态，返回 `true`；
    /// 运行中的任务要等到下一次进度上报才会停下。
    pub(crate) async fn cancel(&self) -> bool {
        self.cancel.cancel();
        let mut task = self.state.write().await;
        if task.status.is_terminal() {
            return false;
        }
        if task.status == TaskStatus::Pending {
            return task.mark_cancelled();
        }
        task.cancelled = true;
        false
    }

    pub(crate) async fn update<R>(&self, f: impl FnOnce(&mut VideoTask) -> R) -> R {
        let mut task = self.state.write().await;
        f(&mut task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_pending_task() {
        let handle = TaskHandle::new("https://a".to_string(), None);
        assert!(handle.cancel().await);
        assert!(handle.is_cancelled());

        let task = handle.snapshot().await;
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.cancelled);
        assert_eq!(task.id, handle.id());
    }

    #[tokio::test]
    async fn test_cancel_running_task_only_flags() {
        let handle = TaskHandle::new("https://a".to_string(), Some("A".to_string()));
        handle.update(|t| t.mark_running()).await;
        assert!(!handle.cancel().await);

        let task = handle.snapshot().await;
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.cancelled);
        assert_eq!(task.title, "A");
    }

    #[tokio::test]
    async fn test_cancel_finished_task_is_noop() {
        let handle = TaskHandle::new("https://a".to_string(), None);
        handle
            .update(|t| {
                t.mark_running();
                t.mark_succeeded()
            })
            .await;
        assert!(!handle.cancel().await);

        let task = handle.snapshot().await;
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert!(!task.cancelled);
    }
}

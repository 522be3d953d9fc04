use crate::progress::{parse_percent, truncate_chars};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 初始标题截取的 URL 长度
const TITLE_FROM_URL_LEN: usize = 50;

/// 任务状态枚举
///
/// 状态只能向前推进：`Pending → Running → (Processing) → 终态`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// 等待开始
    Pending,
    /// 正在下载
    Running,
    /// 传输结束，后处理中（合并、转码）
    Processing,
    /// 已完成
    Succeeded,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

impl TaskStatus {
    fn rank(self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Running => 1,
            TaskStatus::Processing => 2,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled => 3,
        }
    }

    /// 是否为终态
    pub fn is_terminal(self) -> bool {
        self.rank() == 3
    }

    /// 是否占用一个工作槽
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Processing)
    }

    /// 判断能否迁移到 `next`
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

/// 视频下载任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoTask {
    /// 任务唯一标识符
    pub id: String,
    /// 视频 URL
    pub url: String,
    /// 标题，获取到元数据后会被覆盖
    pub title: String,
    /// 当前状态
    pub status: TaskStatus,
    /// 进度百分比 [0, 100]
    pub progress: f64,
    /// 最近一次上报的速度
    pub speed: String,
    /// 最近一次上报的剩余时间
    pub eta: String,
    /// 错误信息（仅失败时）
    pub error: Option<String>,
    /// 是否成功完成
    pub completed: bool,
    /// 是否已请求取消
    pub cancelled: bool,
    /// 分辨率描述
    pub resolution: String,
}

impl VideoTask {
    pub fn new(id: String, url: String, title: Option<String>) -> Self {
        let title = title.unwrap_or_else(|| truncate_chars(&url, TITLE_FROM_URL_LEN).to_string());
        Self {
            id,
            url,
            title,
            status: TaskStatus::Pending,
            progress: 0.0,
            speed: String::new(),
            eta: String::new(),
            error: None,
            completed: false,
            cancelled: false,
            resolution: String::new(),
        }
    }

    fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    pub fn mark_running(&mut self) -> bool {
        self.transition(TaskStatus::Running)
    }

    /// 应用一次 "downloading" 事件
    ///
    /// 进入后处理之后的事件只刷新速度、剩余时间和分辨率。
    pub fn apply_progress(&mut self, progress: &DownloadProgress) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        if self.status == TaskStatus::Pending {
            self.status = TaskStatus::Running;
        }
        if self.status == TaskStatus::Running {
            let percent = parse_percent(&progress.percent);
            if percent > self.progress {
                self.progress = percent;
            }
        }
        self.speed = progress.speed.trim().to_string();
        self.eta = progress.eta.trim().to_string();
        if let Some(height) = progress.height {
            self.resolution = format!("{height}p");
        }
        true
    }

    pub fn mark_processing(&mut self) -> bool {
        self.transition(TaskStatus::Processing)
    }

    pub fn mark_succeeded(&mut self) -> bool {
        if !self.transition(TaskStatus::Succeeded) {
            return false;
        }
        self.progress = 100.0;
        self.completed = true;
        true
    }

    /// 标记失败，`message` 应已清理并截断
    pub fn mark_failed(&mut self, message: String) -> bool {
        if !self.transition(TaskStatus::Failed) {
            return false;
        }
        self.error = Some(message);
        true
    }

    pub fn mark_cancelled(&mut self) -> bool {
        self.cancelled = true;
        self.transition(TaskStatus::Cancelled)
    }

    /// 是否已经有了终止原因
    pub fn is_done(&self) -> bool {
        self.completed || self.error.is_some() || self.cancelled
    }

    /// 用于展示的状态文本
    pub fn status_text(&self) -> String {
        match self.status {
            TaskStatus::Pending => "Pending".to_string(),
            TaskStatus::Running => format!("Running {:.1}%", self.progress),
            TaskStatus::Processing => "Processing...".to_string(),
            TaskStatus::Succeeded if self.resolution.is_empty() => "Succeeded".to_string(),
            TaskStatus::Succeeded => format!("Succeeded {}", self.resolution),
            TaskStatus::Failed => "Failed".to_string(),
            TaskStatus::Cancelled => "Cancelled".to_string(),
        }
    }
}

/// 单次下载进度，字段均为展示用的原始字符串
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadProgress {
    /// 百分比字符串，如 `" 45.3%"`
    pub percent: String,
    pub speed: String,
    pub eta: String,
    /// 当前流的高度（像素）
    pub height: Option<u32>,
}

/// 传输过程中上报的进度事件
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// 数据传输中
    Downloading(DownloadProgress),
    /// 传输完成，即将开始后处理
    Finished,
}

/// 预检得到的视频元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: Option<String>,
    /// 时长（秒）
    pub duration: Option<f64>,
    /// 可用视频流高度，去重后降序
    pub heights: Vec<u32>,
    /// 播放列表条目数，单个视频为 `None`
    pub playlist_entries: Option<usize>,
}

impl VideoMetadata {
    pub fn max_height(&self) -> Option<u32> {
        self.heights.first().copied()
    }

    pub fn is_playlist(&self) -> bool {
        self.playlist_entries.is_some()
    }
}

/// 批次统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub running: usize,
    pub pending: usize,
    /// 每个任务都已完成、失败或取消
    pub all_done: bool,
    /// 成功任务的分辨率（去重）
    pub resolutions: Vec<String>,
}

impl BatchStats {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a VideoTask>) -> Self {
        let mut stats = BatchStats {
            all_done: true,
            ..Default::default()
        };
        let mut resolutions = BTreeSet::new();

        for task in tasks {
            stats.total += 1;
            if task.completed {
                stats.completed += 1;
                if !task.resolution.is_empty() {
                    resolutions.insert(task.resolution.clone());
                }
            }
            if task.error.is_some() {
                stats.failed += 1;
            }
            match task.status {
                TaskStatus::Cancelled => stats.cancelled += 1,
                TaskStatus::Running | TaskStatus::Processing => stats.running += 1,
                TaskStatus::Pending => stats.pending += 1,
                _ => {}
            }
            stats.all_done &= task.is_done();
        }

        stats.resolutions = resolutions.into_iter().collect();
        stats
    }
}

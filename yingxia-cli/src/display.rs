//! 终端进度显示

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use yingxia_core::{BatchStats, VideoMetadata, VideoTask};

/// 进度行中标题的最大字符数
const TITLE_WIDTH: usize = 40;

/// 每个任务一行进度条
pub struct TaskBoard {
    multi: MultiProgress,
    bars: Vec<ProgressBar>,
    style: ProgressStyle,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    pub fn with_target(target: ProgressDrawTarget) -> Self {
        let style = ProgressStyle::with_template("{bar:30.cyan/blue} {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: Vec::new(),
            style,
        }
    }

    /// 按最新快照重绘
    pub fn refresh(&mut self, tasks: &[VideoTask]) {
        while self.bars.len() < tasks.len() {
            let bar = self.multi.add(ProgressBar::new(100));
            bar.set_style(self.style.clone());
            self.bars.push(bar);
        }

        for (bar, task) in self.bars.iter().zip(tasks) {
            if bar.is_finished() {
                continue;
            }
            bar.set_position(task.progress.clamp(0.0, 100.0) as u64);
            let row = task_row(task);
            if task.status.is_terminal() {
                bar.finish_with_message(row);
            } else {
                bar.set_message(row);
            }
        }
    }

    /// 在进度条上方输出一行
    pub fn println(&self, msg: impl AsRef<str>) {
        let _ = self.multi.println(msg);
    }
}

impl Default for TaskBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// 单个任务的描述
pub fn task_row(task: &VideoTask) -> String {
    let title: String = task.title.chars().take(TITLE_WIDTH).collect();
    let mut row = format!("{title} | {}", task.status_text());
    if task.status.is_active() {
        for field in [&task.speed, &task.eta] {
            if !field.is_empty() {
                row.push_str(" | ");
                row.push_str(field);
            }
        }
    }
    if let Some(error) = &task.error {
        row.push_str(" | ");
        row.push_str(error);
    }
    row
}

/// 批次完成后的汇总
pub fn summary(stats: &BatchStats) -> String {
    let mut line = format!(
        "Finished {}/{}: {} succeeded, {} failed",
        stats.completed + stats.failed + stats.cancelled,
        stats.total,
        stats.completed,
        stats.failed
    );
    if stats.cancelled > 0 {
        line.push_str(&format!(", {} cancelled", stats.cancelled));
    }
    if !stats.resolutions.is_empty() {
        line.push_str(&format!(" ({})", stats.resolutions.join(", ")));
    }
    line
}

/// 把秒数格式化为 `h:mm:ss` 或 `m:ss`
pub fn format_duration(seconds: Option<f64>) -> String {
    let Some(seconds) = seconds.filter(|s| *s > 0.0) else {
        return "N/A".to_string();
    };
    let total = seconds as u64;
    let (hours, minutes, secs) = (total / 3600, total % 3600 / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

/// `--info` 的输出
pub fn describe(url: &str, meta: &VideoMetadata) -> Vec<String> {
    let title = meta.title.as_deref().unwrap_or("N/A");
    if let Some(entries) = meta.playlist_entries {
        return vec![format!("Playlist: {title}"), format!("  Videos: {entries}")];
    }

    let mut lines = vec![
        format!("Title: {title}"),
        format!("  URL: {url}"),
        format!("  Duration: {}", format_duration(meta.duration)),
    ];
    if !meta.heights.is_empty() {
        let heights: Vec<String> = meta.heights.iter().take(8).map(|h| format!("{h}p")).collect();
        lines.push(format!("  Available: {}", heights.join(", ")));
    }
    lines
}

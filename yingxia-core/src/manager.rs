use crate::{
    extractor::{Extractor, ProgressReporter},
    options::JobConfig,
    progress::{ERROR_FIELD_LEN, ERROR_LOG_LEN, TITLE_LOG_LEN, sanitize_message, truncate_chars},
    sink::PresentationSink,
    task::TaskHandle,
    types::{BatchStats, TaskStatus, VideoTask},
};
use std::{
    collections::HashMap,
    ops::RangeInclusive,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tokio::{
    sync::{Mutex, RwLock, Semaphore},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// 默认同时下载的视频数
pub const DEFAULT_MAX_WORKERS: usize = 3;
/// 允许的并发范围
pub const MAX_WORKERS_RANGE: RangeInclusive<usize> = 1..=10;

/// 工作池的控制状态
#[derive(Default)]
struct PoolControl {
    running: bool,
    pool: Option<Arc<Semaphore>>,
    /// 运行中的任务，按任务 ID 索引
    in_flight: HashMap<String, JoinHandle<()>>,
}

struct Inner {
    extractor: Arc<dyn Extractor>,
    sink: Arc<dyn PresentationSink>,
    max_workers: usize,
    tasks: RwLock<Vec<TaskHandle>>,
    control: Mutex<PoolControl>,
    /// 每次 `start` 递增，旧批次的工作线程不会影响新批次
    generation: AtomicU64,
    /// 本批次是否已经发出完成通知
    batch_finished: AtomicBool,
}

/// 批量下载管理器
///
/// 任务按添加顺序保存，`start` 时以固定大小的工作池并发执行。
pub struct DownloadManager {
    inner: Arc<Inner>,
}

impl DownloadManager {
    /// 创建新的下载管理器
    ///
    /// # 参数
    /// * `extractor` - 视频解析与下载实现
    /// * `sink` - 展示层回调
    /// * `max_workers` - 同时下载的最大任务数，限制在 1..=10
    pub fn new(
        extractor: Arc<dyn Extractor>,
        sink: Arc<dyn PresentationSink>,
        max_workers: usize,
    ) -> Self {
        let clamped = max_workers.clamp(*MAX_WORKERS_RANGE.start(), *MAX_WORKERS_RANGE.end());
        if clamped != max_workers {
            warn!(
                requested = max_workers,
                using = clamped,
                "max_workers out of range, clamped"
            );
        }

        Self {
            inner: Arc::new(Inner {
                extractor,
                sink,
                max_workers: clamped,
                tasks: RwLock::new(Vec::new()),
                control: Mutex::new(PoolControl::default()),
                generation: AtomicU64::new(0),
                batch_finished: AtomicBool::new(true),
            }),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    /// 添加下载任务
    ///
    /// 任务处于等待状态，直到下一次 `start`。
    pub async fn add_task(&self, url: impl Into<String>, title: Option<String>) -> TaskHandle {
        let handle = TaskHandle::new(url.into(), title);
        self.inner.tasks.write().await.push(handle.clone());
        debug!(task_id = handle.id(), "Task added");
        handle
    }

    /// 清空任务列表，运行中调用不做任何事并返回 `false`
    pub async fn clear_tasks(&self) -> bool {
        let control = self.inner.control.lock().await;
        if control.running {
            warn!("clear_tasks called while a batch is running, ignored");
            return false;
        }
        self.inner.tasks.write().await.clear();
        true
    }

    /// 开始下载所有等待中的任务
    ///
    /// 每个任务拿到 `template` 的独立副本。已在运行时不做任何事。
    ///
    /// # 返回
    /// 本次派发的任务数
    pub async fn start(&self, template: &JobConfig) -> usize {
        let mut control = self.inner.control.lock().await;
        if control.running {
            debug!("start called while already running, ignored");
            return 0;
        }

        let mut pending = Vec::new();
        for handle in self.inner.tasks.read().await.iter() {
            if !handle.is_cancelled() && handle.status().await == TaskStatus::Pending {
                pending.push(handle.clone());
            }
        }
        if pending.is_empty() {
            info!("No pending tasks to dispatch");
            return 0;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.batch_finished.store(false, Ordering::SeqCst);

        let pool = Arc::new(Semaphore::new(self.inner.max_workers));
        control.running = true;
        control.pool = Some(Arc::clone(&pool));

        let dispatched = pending.len();
        for task in pending {
            let task_id = task.id().to_string();
            let job = Job {
                inner: Arc::clone(&self.inner),
                task,
                config: template.clone(),
                pool: Arc::clone(&pool),
                generation,
            };
            control.in_flight.insert(task_id, tokio::spawn(job.run()));
        }

        info!(
            dispatched,
            max_workers = self.inner.max_workers,
            generation,
            "Batch started"
        );
        dispatched
    }

    /// 取消所有任务
    ///
    /// 等待中的任务直接取消；运行中的任务在下一次进度上报时停止。
    /// 工作池被关闭但不等待运行中的任务结束。
    pub async fn cancel_all(&self) {
        let mut control = self.inner.control.lock().await;

        let mut dequeued = 0usize;
        for task in self.inner.tasks.read().await.iter() {
            if task.cancel().await {
                dequeued += 1;
            }
        }

        if let Some(pool) = control.pool.take() {
            pool.close();
        }
        // 丢弃 JoinHandle 即与任务分离，不会中止它
        let detached = control.in_flight.drain().count();
        control.running = false;
        drop(control);

        info!(dequeued, detached, "Cancelled all tasks");
        self.inner.sink.on_task_changed();

        let generation = self.inner.generation.load(Ordering::SeqCst);
        self.inner.check_completion(generation).await;
    }

    /// 关闭工作池，不修改任务的取消标记（退出时使用）
    pub async fn shutdown(&self) {
        let mut control = self.inner.control.lock().await;
        if let Some(pool) = control.pool.take() {
            pool.close();
        }
        let detached = control.in_flight.drain().count();
        control.running = false;
        debug!(detached, "Download manager shut down");
    }

    pub async fn is_running(&self) -> bool {
        self.inner.control.lock().await.running
    }

    /// 获取所有任务，按添加顺序
    pub async fn tasks(&self) -> Vec<VideoTask> {
        self.inner.snapshot().await
    }

    /// 获取单个任务
    pub async fn task(&self, task_id: &str) -> Option<VideoTask> {
        let handle = self
            .inner
            .tasks
            .read()
            .await
            .iter()
            .find(|h| h.id() == task_id)
            .cloned()?;
        Some(handle.snapshot().await)
    }

    /// 统计当前批次
    pub async fn stats(&self) -> BatchStats {
        BatchStats::from_tasks(&self.inner.snapshot().await)
    }
}

impl Inner {
    async fn snapshot(&self) -> Vec<VideoTask> {
        let handles = self.tasks.read().await.clone();
        let mut tasks = Vec::with_capacity(handles.len());
        for handle in &handles {
            tasks.push(handle.snapshot().await);
        }
        tasks
    }

    /// 工作线程结束时调用
    ///
    /// 本批次派发的任务全部结束后关闭工作池，不考虑批次之外新加的任务。
    async fn finish_job(&self, task_id: &str, generation: u64) {
        {
            let mut control = self.control.lock().await;
            if generation == self.generation.load(Ordering::SeqCst) {
                control.in_flight.remove(task_id);
                if control.running && control.in_flight.is_empty() {
                    control.running = false;
                    control.pool = None;
                    debug!(generation, "Worker pool drained");
                }
            }
        }
        self.check_completion(generation).await;
    }

    /// 检查是否全部结束，可被多个工作线程并发调用
    async fn check_completion(&self, generation: u64) -> bool {
        if generation != self.generation.load(Ordering::SeqCst) {
            return false;
        }

        let stats = BatchStats::from_tasks(&self.snapshot().await);
        if !stats.all_done {
            return false;
        }

        if self.batch_finished.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!(
            total = stats.total,
            completed = stats.completed,
            failed = stats.failed,
            cancelled = stats.cancelled,
            "Batch finished"
        );
        self.sink.on_batch_finished();
        true
    }
}

/// 提交到工作池的单个任务
struct Job {
    inner: Arc<Inner>,
    task: TaskHandle,
    config: JobConfig,
    pool: Arc<Semaphore>,
    generation: u64,
}

impl Job {
    async fn run(self) {
        match Arc::clone(&self.pool).acquire_owned().await {
            Ok(permit) => {
                self.execute().await;
                drop(permit);
                self.inner.sink.on_task_changed();
            }
            Err(_) => {
                debug!(task_id = self.task.id(), "Pool closed before the job started");
            }
        }
        self.inner
            .finish_job(self.task.id(), self.generation)
            .await;
    }

    async fn execute(&self) {
        let task = &self.task;
        let sink = &self.inner.sink;
        let extractor = &self.inner.extractor;

        // 与 cancel_all 在同一把锁内判断，取消后不再启动
        let url = task
            .update(|t| {
                if task.is_cancelled() {
                    t.mark_cancelled();
                    return None;
                }
                t.mark_running();
                Some(t.url.clone())
            })
            .await;
        let Some(url) = url else {
            debug!(task_id = task.id(), "Task cancelled before start");
            return;
        };
        sink.on_task_changed();

        match extractor.probe(&url, &self.config).await {
            Ok(Some(meta)) => {
                task.update(|t| {
                    if let Some(title) = meta.title.as_deref().filter(|s| !s.trim().is_empty()) {
                        t.title = title.to_string();
                    }
                    if let Some(height) = meta.max_height() {
                        t.resolution = format!("highest available {height}p");
                    }
                })
                .await;
                sink.on_task_changed();
            }
            Ok(None) => {}
            Err(e) => {
                debug!(task_id = task.id(), error = %e, "Metadata probe failed, continuing");
            }
        }

        let reporter = ProgressReporter::new(task.clone(), Arc::clone(sink));
        let result = extractor.transfer(&url, &self.config, &reporter).await;

        match result {
            Ok(()) if task.is_cancelled() => {
                task.update(|t| t.mark_cancelled()).await;
                info!(task_id = task.id(), "Transfer completed after cancellation, marked cancelled");
            }
            Ok(()) => {
                let resolution = task
                    .update(|t| {
                        t.mark_succeeded();
                        t.resolution.clone()
                    })
                    .await;
                info!(task_id = task.id(), %resolution, "Download succeeded");
            }
            Err(e) if e.is_cancelled() || task.is_cancelled() => {
                task.update(|t| t.mark_cancelled()).await;
                info!(task_id = task.id(), "Download cancelled");
            }
            Err(e) => {
                let message = sanitize_message(&e.to_string());
                let title = task
                    .update(|t| {
                        t.mark_failed(truncate_chars(&message, ERROR_FIELD_LEN).to_string());
                        t.title.clone()
                    })
                    .await;
                let (title, message) = failure_log_fields(&title, &message);
                warn!(task_id = task.id(), title, "{message}");
            }
        }
    }
}

/// 失败日志中的标题与错误信息
fn failure_log_fields<'a>(title: &'a str, message: &'a str) -> (&'a str, &'a str) {
    (
        truncate_chars(title, TITLE_LOG_LEN),
        truncate_chars(message, ERROR_LOG_LEN),
    )
}

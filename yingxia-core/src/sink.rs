use tokio::sync::mpsc;

/// 展示层回调
///
/// 回调在工作线程中同步调用，实现方负责把通知转发到自己的事件循环。
pub trait PresentationSink: Send + Sync {
    /// 某个任务发生了变化，展示层应重新读取任务列表
    fn on_task_changed(&self);

    /// 所有任务都进入了终态
    fn on_batch_finished(&self);
}

/// 展示层事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEvent {
    TaskChanged,
    BatchFinished,
}

/// 通过 channel 转发通知的展示层
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    /// 返回展示层和事件接收器
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PresentationSink for ChannelSink {
    fn on_task_changed(&self) {
        let _ = self.tx.send(SinkEvent::TaskChanged);
    }

    fn on_batch_finished(&self) {
        let _ = self.tx.send(SinkEvent::BatchFinished);
    }
}

/// 忽略所有通知
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl PresentationSink for NoopSink {
    fn on_task_changed(&self) {}

    fn on_batch_finished(&self) {}
}

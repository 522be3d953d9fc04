mod cli;
mod config;
mod display;
mod urls;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::Args;
use config::AppSettings;
use display::{TaskBoard, describe, summary};
use std::{path::Path, process::ExitCode, sync::Arc, time::Duration};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use yingxia_core::{
    BatchStats, ChannelSink, DownloadManager, Extractor, Ffmpeg, JobConfig, SinkEvent, YtDlp,
    progress::{sanitize_message, truncate_chars},
    ytdlp::format_args,
};

/// `--info` 最多探测的链接数
const INFO_LIMIT: usize = 5;
/// 取消后等待运行中任务收尾的时间
const CANCEL_GRACE: Duration = Duration::from_secs(5);

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "yingxia=info,yingxia_core=info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let args = Args::parse();

    let config_path = args.config_path();
    let mut settings = AppSettings::load(&config_path)
        .await
        .with_context(|| format!("failed to load settings from {}", config_path.display()))?;
    args.apply_to(&mut settings);
    settings.validate()?;

    if args.save {
        settings.save(&config_path).await?;
        info!(path = %config_path.display(), "Settings saved");
    }

    let from_file = match &args.file {
        Some(path) => urls::read_url_file(path).await?,
        None => Vec::new(),
    };
    let urls = urls::collect_urls(&args.urls, from_file);
    if urls.is_empty() && !args.update_ytdlp {
        if args.save {
            return Ok(ExitCode::SUCCESS);
        }
        bail!("no video URLs given, pass them as arguments or with --file");
    }

    let ytdlp = YtDlp::from_path().context("yt-dlp is required but was not found in PATH")?;
    if args.update_ytdlp {
        let result = ytdlp.update().await?;
        println!("{result}");
        if urls.is_empty() {
            return Ok(ExitCode::SUCCESS);
        }
    }
    let ffmpeg_path = Path::new(settings.ffmpeg_path.trim());
    let ffmpeg = Ffmpeg::detect(Some(ffmpeg_path)).await;
    match &ffmpeg {
        Some(ffmpeg) => info!(version = ffmpeg.version(), "Using ffmpeg"),
        None => warn!("ffmpeg not found, merging formats and extracting audio will fail"),
    }

    let job = settings.job_config(
        args.format_policy(),
        !args.no_playlist,
        ffmpeg
            .as_ref()
            .and_then(Ffmpeg::location)
            .map(Path::to_path_buf),
    );

    if args.info {
        show_info(&ytdlp, &urls, &job).await;
        return Ok(ExitCode::SUCCESS);
    }

    fs_err::tokio::create_dir_all(&settings.download_path).await?;
    info!(
        path = %settings.download_path.display(),
        quality = ?job.format.quality,
        max_concurrent = settings.max_concurrent,
        threads = job.concurrent_fragments,
        ffmpeg = ffmpeg.is_some(),
        format = %format_args(&job.format).join(" "),
        urls = urls.len(),
        "Starting batch download"
    );
    let stats = run_batch(Arc::new(ytdlp), &urls, &job, settings.max_concurrent).await?;
    if stats.failed > 0 || stats.cancelled > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// 打印视频信息
async fn show_info(extractor: &dyn Extractor, urls: &[String], job: &JobConfig) {
    if urls.len() > INFO_LIMIT {
        info!(
            skipped = urls.len() - INFO_LIMIT,
            "Only the first {INFO_LIMIT} URLs are probed"
        );
    }

    for url in urls.iter().take(INFO_LIMIT) {
        match extractor.probe(url, job).await {
            Ok(Some(meta)) => {
                for line in describe(url, &meta) {
                    println!("{line}");
                }
            }
            Ok(None) => println!("{url}: no metadata"),
            Err(e) => {
                let message = sanitize_message(&e.to_string());
                println!("{url}: {}", truncate_chars(&message, 100));
            }
        }
    }
}

/// 下载所有链接，直到全部结束或被中断
async fn run_batch(
    extractor: Arc<dyn Extractor>,
    urls: &[String],
    job: &JobConfig,
    max_workers: usize,
) -> Result<BatchStats> {
    let (sink, mut events) = ChannelSink::new();
    let manager = DownloadManager::new(extractor, Arc::new(sink), max_workers);
    for url in urls {
        manager.add_task(url.clone(), None).await;
    }

    let mut board = TaskBoard::new();
    board.refresh(&manager.tasks().await);

    let dispatched = manager.start(job).await;
    info!(dispatched, "Downloading");

    let mut cancelled = false;
    loop {
        tokio::select! {
            event = events.recv() => {
                let finished = match event {
                    Some(event) => drain(&mut events, event),
                    None => true,
                };
                board.refresh(&manager.tasks().await);
                if finished {
                    break;
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                if cancelled {
                    manager.shutdown().await;
                    board.println("Aborted");
                    return Ok(manager.stats().await);
                }
                cancelled = true;
                board.println("Cancelling, press Ctrl-C again to quit");
                manager.cancel_all().await;
            }
        }
    }

    if cancelled {
        wait_for_active(&manager, &mut events, &mut board).await;
    }

    let tasks = manager.tasks().await;
    board.refresh(&tasks);
    let stats = BatchStats::from_tasks(&tasks);
    board.println(summary(&stats));
    Ok(stats)
}

/// 合并积压的事件，返回是否收到了批次完成
fn drain(events: &mut UnboundedReceiver<SinkEvent>, first: SinkEvent) -> bool {
    let mut finished = first == SinkEvent::BatchFinished;
    while let Ok(event) = events.try_recv() {
        finished |= event == SinkEvent::BatchFinished;
    }
    finished
}

/// 取消后给运行中的任务一点时间进入终态
async fn wait_for_active(
    manager: &DownloadManager,
    events: &mut UnboundedReceiver<SinkEvent>,
    board: &mut TaskBoard,
) {
    let waited = tokio::time::timeout(CANCEL_GRACE, async {
        while manager.stats().await.running > 0 {
            tokio::select! {
                event = events.recv() => {
                    if event.is_none() {
                        break;
                    }
                    board.refresh(&manager.tasks().await);
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    })
    .await;

    if waited.is_err() {
        warn!("Some downloads did not stop in time");
    }
    manager.shutdown().await;
}

//! 基于 yt-dlp 命令行的解析与下载实现

use crate::{
    error::{DownloadError, DownloadResult},
    extractor::{Extractor, ProgressReporter},
    options::{CookieSource, DownloadKind, FormatPolicy, JobConfig, Quality},
    progress::sanitize_message,
    types::{DownloadProgress, ProgressEvent, VideoMetadata},
};
use async_trait::async_trait;
use serde::Deserialize;
use std::{
    collections::BTreeSet,
    io,
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
};
use tracing::{debug, info};

/// 进度行前缀，用于从 stdout 中区分进度与其他输出
const PROGRESS_PREFIX: &str = "yingxia|";
const PROGRESS_TEMPLATE: &str = "download:yingxia|%(progress.status)s|%(progress._percent_str)s|%(progress._speed_str)s|%(progress._eta_str)s|%(info.height)s";

/// 最高画质时的排序：分辨率优先，其次编码
const BEST_SORT: &str = "res:4320,res:2160,res:1440,res,vcodec:vp9.2,vcodec:vp9,vcodec:av01,vcodec:avc,acodec:opus,acodec:aac";
const CAPPED_SORT: &str = "res,vcodec:vp9,acodec:opus";
const VIDEO_ONLY_SORT: &str = "res:4320,res";
const SUBTITLE_LANGS: &str = "zh,en,zh-Hans,zh-Hant,ja,ko";

/// yt-dlp 可执行文件
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// 在 PATH 中查找 `yt-dlp`
    pub fn from_path() -> DownloadResult<Self> {
        let program = which::which("yt-dlp").map_err(|e| DownloadError::Launch {
            program: "yt-dlp".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, e),
        })?;
        Ok(Self::new(program))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// 获取版本号
    pub async fn version(&self) -> DownloadResult<String> {
        let output = self
            .command()
            .arg("--version")
            .output()
            .await
            .map_err(|source| self.launch_error(source))?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// 运行 `yt-dlp -U` 自我更新
    ///
    /// # 返回
    /// 输出的最后一行，如 `yt-dlp is up to date (2024.08.06)`
    pub async fn update(&self) -> DownloadResult<String> {
        let output = self
            .command()
            .arg("-U")
            .output()
            .await
            .map_err(|source| self.launch_error(source))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let last_line = stdout
            .lines()
            .rev()
            .map(sanitize_message)
            .find(|line| !line.is_empty())
            .unwrap_or_default();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = last_error_line(&stderr)
                .map(sanitize_message)
                .unwrap_or_else(|| format!("yt-dlp exited with {}", output.status));
            return Err(DownloadError::Update(message));
        }
        info!(result = %last_line, "yt-dlp update finished");
        Ok(last_line)
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    fn launch_error(&self, source: io::Error) -> DownloadError {
        DownloadError::Launch {
            program: self.program.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl Extractor for YtDlp {
    async fn probe(&self, url: &str, config: &JobConfig) -> DownloadResult<Option<VideoMetadata>> {
        let output = self
            .command()
            .args(probe_args(config, url))
            .output()
            .await
            .map_err(|source| self.launch_error(source))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = last_error_line(&stderr)
                .map(str::to_string)
                .unwrap_or_else(|| format!("yt-dlp exited with {}", output.status));
            return Err(DownloadError::Probe(message));
        }

        parse_probe_output(&output.stdout).map(Some)
    }

    async fn transfer(
        &self,
        url: &str,
        config: &JobConfig,
        progress: &ProgressReporter,
    ) -> DownloadResult<()> {
        let mut child = self
            .command()
            .args(transfer_args(config, url))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| self.launch_error(source))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::Transfer("failed to capture yt-dlp stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::Transfer("failed to capture yt-dlp stderr".to_string()))?;

        // stderr 单独读取，避免管道写满阻塞子进程
        let stderr_reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut last_error = None;
            while let Ok(Some(line)) = lines.next_line().await {
                if line.contains("ERROR:") {
                    last_error = Some(line);
                }
            }
            last_error
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            let Some(event) = parse_progress_line(&line) else {
                continue;
            };
            if let Err(e) = progress.report(event).await {
                debug!(task_id = progress.task_id(), "Stopping yt-dlp");
                let _ = child.kill().await;
                stderr_reader.abort();
                return Err(e);
            }
        }

        let status = child.wait().await?;
        let last_error = stderr_reader.await.ok().flatten();
        if status.success() {
            return Ok(());
        }
        Err(DownloadError::Transfer(
            last_error.unwrap_or_else(|| format!("yt-dlp exited with {status}")),
        ))
    }
}

/// 探测与下载共用的网络参数
fn network_args(config: &JobConfig) -> Vec<String> {
    let mut args = vec!["--no-check-certificates".to_string()];

    match &config.cookies {
        Some(CookieSource::File(path)) => {
            args.push("--cookies".to_string());
            args.push(path.display().to_string());
        }
        Some(CookieSource::Browser(browser)) => {
            args.push("--cookies-from-browser".to_string());
            args.push(browser.clone());
        }
        None => {}
    }

    if let Some(proxy) = config.proxy.as_deref().map(str::trim)
        && !proxy.is_empty()
    {
        args.push("--proxy".to_string());
        args.push(proxy.to_string());
    }
    args
}

fn playlist_arg(config: &JobConfig) -> &'static str {
    if config.playlist {
        "--yes-playlist"
    } else {
        "--no-playlist"
    }
}

/// 格式选择参数
pub fn format_args(policy: &FormatPolicy) -> Vec<String> {
    let mut args = Vec::new();

    match (&policy.kind, policy.quality) {
        (DownloadKind::AudioOnly { codec, quality }, _) => {
            push(&mut args, &["-f", "bestaudio/best", "-x"]);
            push(
                &mut args,
                &["--audio-format", codec.as_str(), "--audio-quality", quality.as_str()],
            );
        }
        (DownloadKind::VideoOnly, Quality::Best) => {
            push(
                &mut args,
                &["-f", "bv*[vcodec!^=none]/bv*/best", "-S", VIDEO_ONLY_SORT],
            );
        }
        (DownloadKind::VideoOnly, Quality::MaxHeight(h)) => {
            let selector = format!("bv*[height<={h}]/bv*/best[height<={h}]/best");
            push(&mut args, &["-f", selector.as_str()]);
        }
        (DownloadKind::VideoAudio, quality) => {
            match quality {
                Quality::Best => push(
                    &mut args,
                    &["-f", "bv*+ba/b", "-S", BEST_SORT, "--format-sort-force"],
                ),
                Quality::MaxHeight(h) => {
                    let selector = format!("bv*[height<={h}]+ba/b[height<={h}]/b");
                    push(&mut args, &["-f", selector.as_str(), "-S", CAPPED_SORT]);
                }
            }
            if !policy.keep_original {
                push(&mut args, &["--merge-output-format", "mkv"]);
            }
        }
    }

    if policy.embed_subtitles {
        push(
            &mut args,
            &[
                "--write-subs",
                "--write-auto-subs",
                "--sub-langs",
                SUBTITLE_LANGS,
                "--embed-subs",
            ],
        );
    }
    if policy.prefer_free_formats {
        push(&mut args, &["--prefer-free-formats"]);
    }
    args
}

fn push(args: &mut Vec<String>, items: &[&str]) {
    args.extend(items.iter().map(|s| s.to_string()));
}

fn probe_args(config: &JobConfig, url: &str) -> Vec<String> {
    let mut args: Vec<String> = ["-J", "--flat-playlist", "--no-warnings", playlist_arg(config)]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.extend(network_args(config));
    args.push("--".to_string());
    args.push(url.to_string());
    args
}

/// 下载参数
pub fn transfer_args(config: &JobConfig, url: &str) -> Vec<String> {
    let fragments = config.concurrent_fragments.to_string();
    let mut args: Vec<String> = [
        "--quiet",
        "--no-warnings",
        "--progress",
        "--newline",
        "--progress-template",
        PROGRESS_TEMPLATE,
        "-o",
        config.output_template.as_str(),
        "--concurrent-fragments",
        fragments.as_str(),
        playlist_arg(config),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.extend(network_args(config));
    if let Some(location) = &config.ffmpeg_location {
        args.push("--ffmpeg-location".to_string());
        args.push(location.display().to_string());
    }
    args.extend(format_args(&config.format));
    args.push("--".to_string());
    args.push(url.to_string());
    args
}

/// 解析一行进度输出
///
/// 格式为 `yingxia|status|percent|speed|eta|height`，其他行返回 `None`。
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let mut fields = rest.split('|').map(sanitize_message);

    match fields.next()?.as_str() {
        "downloading" => {
            let percent = fields.next().unwrap_or_default();
            let speed = fields.next().unwrap_or_default();
            let eta = fields.next().unwrap_or_default();
            let height = fields.next().and_then(|h| h.parse().ok());
            Some(ProgressEvent::Downloading(DownloadProgress {
                percent,
                speed,
                eta,
                height,
            }))
        }
        "finished" => Some(ProgressEvent::Finished),
        _ => None,
    }
}

fn last_error_line(stderr: &str) -> Option<&str> {
    stderr.lines().rev().find(|line| line.contains("ERROR:"))
}

#[derive(Deserialize)]
struct ProbeInfo {
    #[serde(rename = "_type")]
    kind: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    height: Option<u32>,
    #[serde(default)]
    formats: Vec<ProbeFormat>,
    entries: Option<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    height: Option<u32>,
    vcodec: Option<String>,
}

/// 解析 `yt-dlp -J` 的输出
pub fn parse_probe_output(json: &[u8]) -> DownloadResult<VideoMetadata> {
    let info: ProbeInfo = serde_json::from_slice(json)?;

    let mut heights: BTreeSet<u32> = info
        .formats
        .iter()
        .filter(|f| f.vcodec.as_deref() != Some("none"))
        .filter_map(|f| f.height)
        .filter(|h| *h > 0)
        .collect();
    if heights.is_empty()
        && let Some(height) = info.height.filter(|h| *h > 0)
    {
        heights.insert(height);
    }

    let playlist_entries = match info.kind.as_deref() {
        Some("playlist") => Some(info.entries.map_or(0, |e| e.len())),
        _ => None,
    };

    Ok(VideoMetadata {
        title: info.title,
        duration: info.duration,
        heights: heights.into_iter().rev().collect(),
        playlist_entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_best_video_audio_format() {
        let args = format_args(&FormatPolicy::default());
        assert_eq!(arg_after(&args, "-f"), Some("bv*+ba/b"));
        assert_eq!(arg_after(&args, "-S"), Some(BEST_SORT));
        assert!(args.contains(&"--format-sort-force".to_string()));
        assert_eq!(arg_after(&args, "--merge-output-format"), Some("mkv"));
    }

    #[test]
    fn test_capped_video_audio_keeps_original() {
        let policy = FormatPolicy {
            quality: Quality::MaxHeight(1080),
            keep_original: true,
            ..Default::default()
        };
        let args = format_args(&policy);
        assert_eq!(
            arg_after(&args, "-f"),
            Some("bv*[height<=1080]+ba/b[height<=1080]/b")
        );
        assert_eq!(arg_after(&args, "-S"), Some("res,vcodec:vp9,acodec:opus"));
        assert!(!args.contains(&"--merge-output-format".to_string()));
    }

    #[test]
    fn test_video_only_formats() {
        let best = format_args(&FormatPolicy {
            kind: DownloadKind::VideoOnly,
            ..Default::default()
        });
        assert_eq!(arg_after(&best, "-f"), Some("bv*[vcodec!^=none]/bv*/best"));
        assert_eq!(arg_after(&best, "-S"), Some("res:4320,res"));

        let capped = format_args(&FormatPolicy {
            kind: DownloadKind::VideoOnly,
            quality: Quality::MaxHeight(720),
            ..Default::default()
        });
        assert_eq!(
            arg_after(&capped, "-f"),
            Some("bv*[height<=720]/bv*/best[height<=720]/best")
        );
        assert!(!capped.contains(&"--merge-output-format".to_string()));
    }

    #[test]
    fn test_audio_only_with_subtitles() {
        let policy = FormatPolicy {
            kind: DownloadKind::AudioOnly {
                codec: "mp3".to_string(),
                quality: "320".to_string(),
            },
            embed_subtitles: true,
            prefer_free_formats: true,
            ..Default::default()
        };
        let args = format_args(&policy);
        assert_eq!(arg_after(&args, "-f"), Some("bestaudio/best"));
        assert!(args.contains(&"-x".to_string()));
        assert_eq!(arg_after(&args, "--audio-format"), Some("mp3"));
        assert_eq!(arg_after(&args, "--audio-quality"), Some("320"));
        assert_eq!(arg_after(&args, "--sub-langs"), Some(SUBTITLE_LANGS));
        assert!(args.contains(&"--embed-subs".to_string()));
        assert!(args.contains(&"--prefer-free-formats".to_string()));
    }

    #[test]
    fn test_transfer_args() {
        let config = JobConfig {
            output_template: "/videos/%(title)s.%(ext)s".to_string(),
            concurrent_fragments: 16,
            playlist: false,
            cookies: Some(CookieSource::Browser("firefox".to_string())),
            proxy: Some(" http://127.0.0.1:7890 ".to_string()),
            ffmpeg_location: Some(PathBuf::from("/opt/ffmpeg/bin")),
            format: FormatPolicy::default(),
        };
        let args = transfer_args(&config, "https://youtu.be/abc");

        assert_eq!(arg_after(&args, "-o"), Some("/videos/%(title)s.%(ext)s"));
        assert_eq!(arg_after(&args, "--concurrent-fragments"), Some("16"));
        assert_eq!(arg_after(&args, "--progress-template"), Some(PROGRESS_TEMPLATE));
        assert_eq!(arg_after(&args, "--cookies-from-browser"), Some("firefox"));
        assert_eq!(arg_after(&args, "--proxy"), Some("http://127.0.0.1:7890"));
        assert_eq!(arg_after(&args, "--ffmpeg-location"), Some("/opt/ffmpeg/bin"));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/abc"));
        assert_eq!(args[args.len() - 2], "--");
    }

    #[test]
    fn test_parse_progress_lines() {
        let event = parse_progress_line("yingxia|downloading|  45.3%|2.10MiB/s|00:42|1080");
        assert_eq!(
            event,
            Some(ProgressEvent::Downloading(DownloadProgress {
                percent: "45.3%".to_string(),
                speed: "2.10MiB/s".to_string(),
                eta: "00:42".to_string(),
                height: Some(1080),
            }))
        );

        match parse_progress_line("yingxia|downloading|N/A|Unknown B/s|Unknown|NA") {
            Some(ProgressEvent::Downloading(p)) => {
                assert_eq!(p.percent, "N/A");
                assert_eq!(p.height, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        assert_eq!(
            parse_progress_line("yingxia|finished|100%|NA|NA|720"),
            Some(ProgressEvent::Finished)
        );
        assert_eq!(parse_progress_line("yingxia|error|0%|NA|NA|NA"), None);
        assert_eq!(parse_progress_line("[youtube] abc: Downloading webpage"), None);
    }

    #[test]
    fn test_parse_probe_video() {
        let json = br#"{
            "_type": "video",
            "title": "Demo",
            "duration": 212.5,
            "formats": [
                {"format_id": "251", "vcodec": "none", "height": null},
                {"format_id": "137", "vcodec": "avc1.640028", "height": 1080},
                {"format_id": "313", "vcodec": "vp9", "height": 2160},
                {"format_id": "248", "vcodec": "vp9", "height": 1080},
                {"format_id": "sb0", "vcodec": "none", "height": 360}
            ]
        }"#;
        let meta = parse_probe_output(json).unwrap();
        assert_eq!(meta.title.as_deref(), Some("Demo"));
        assert_eq!(meta.duration, Some(212.5));
        assert_eq!(meta.heights, vec![2160, 1080]);
        assert_eq!(meta.max_height(), Some(2160));
        assert!(!meta.is_playlist());
    }

    #[test]
    fn test_parse_probe_playlist() {
        let json = br#"{
            "_type": "playlist",
            "title": "Mix",
            "entries": [{"url": "https://a"}, {"url": "https://b"}, {"url": "https://c"}]
        }"#;
        let meta = parse_probe_output(json).unwrap();
        assert_eq!(meta.playlist_entries, Some(3));
        assert!(meta.heights.is_empty());
    }

    #[test]
    fn test_parse_probe_rejects_garbage() {
        let err = parse_probe_output(b"not json").unwrap_err();
        assert!(matches!(err, DownloadError::Json(_)));
    }

    #[test]
    fn test_last_error_line() {
        let stderr = "WARNING: slow\nERROR: first\nsome trace\nERROR: [youtube] abc: Video unavailable\n";
        assert_eq!(
            last_error_line(stderr),
            Some("ERROR: [youtube] abc: Video unavailable")
        );
        assert_eq!(last_error_line("WARNING: only"), None);
    }

    #[cfg(unix)]
    mod process {
        use crate::{
            error::DownloadError,
            extractor::{Extractor, ProgressReporter},
            options::JobConfig,
            sink::ChannelSink,
            task::TaskHandle,
            types::TaskStatus,
            ytdlp::YtDlp,
        };
        use std::{os::unix::fs::PermissionsExt, path::PathBuf, sync::Arc};

        /// 写一个假的 yt-dlp 脚本
        fn fake_ytdlp(name: &str, body: &str) -> PathBuf {
            let dir = std::env::temp_dir().join(format!("yingxia-{name}-{}", uuid::Uuid::new_v4()));
            fs_err::create_dir_all(&dir).unwrap();
            let path = dir.join("yt-dlp");
            fs_err::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs_err::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn test_transfer_reports_progress() {
            let program = fake_ytdlp(
                "ok",
                "echo '[youtube] abc: Downloading webpage'\n\
                 echo 'yingxia|downloading|  12.5%|1.00MiB/s|00:10|1080'\n\
                 echo 'yingxia|finished|100%|NA|NA|1080'",
            );
            let (sink, _rx) = ChannelSink::new();
            let handle = TaskHandle::new("https://a".to_string(), None);
            handle.update(|t| t.mark_running()).await;
            let reporter = ProgressReporter::new(handle.clone(), Arc::new(sink));

            YtDlp::new(&program)
                .transfer("https://a", &JobConfig::default(), &reporter)
                .await
                .unwrap();

            let task = handle.snapshot().await;
            assert_eq!(task.progress, 12.5);
            assert_eq!(task.resolution, "1080p");
            assert_eq!(task.status, TaskStatus::Processing);
        }

        #[tokio::test]
        async fn test_transfer_failure_carries_error_line() {
            let program = fake_ytdlp(
                "fail",
                "echo 'WARNING: retrying' >&2\n\
                 echo 'ERROR: [youtube] abc: Video unavailable' >&2\n\
                 exit 1",
            );
            let (sink, _rx) = ChannelSink::new();
            let handle = TaskHandle::new("https://a".to_string(), None);
            let reporter = ProgressReporter::new(handle, Arc::new(sink));

            let err = YtDlp::new(&program)
                .transfer("https://a", &JobConfig::default(), &reporter)
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), "ERROR: [youtube] abc: Video unavailable");
        }

        #[tokio::test]
        async fn test_update_reports_last_line() {
            let program = fake_ytdlp(
                "update",
                "[ \"$1\" = \"-U\" ] || exit 2\n\
                 echo 'Current version: stable@2024.07.25'\n\
                 echo 'Updated yt-dlp to stable@2024.08.06'",
            );
            let line = YtDlp::new(&program).update().await.unwrap();
            assert_eq!(line, "Updated yt-dlp to stable@2024.08.06");
        }

        #[tokio::test]
        async fn test_update_failure_carries_error_line() {
            let program = fake_ytdlp(
                "update-fail",
                "echo 'ERROR: Unable to write to /usr/bin/yt-dlp; try running as administrator' >&2\n\
                 exit 1",
            );
            let err = YtDlp::new(&program).update().await.unwrap_err();
            assert!(matches!(err, DownloadError::Update(_)));
            assert!(err.to_string().contains("Unable to write"));
        }

        #[tokio::test]
        async fn test_missing_program_is_launch_error() {
            let err = YtDlp::new("/definitely/not/here/yt-dlp")
                .probe("https://a", &JobConfig::default())
                .await
                .unwrap_err();
            assert!(matches!(err, DownloadError::Launch { .. }));
        }
    }
}

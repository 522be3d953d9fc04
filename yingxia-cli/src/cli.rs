//! 命令行参数解析

use crate::config::AppSettings;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use yingxia_core::{DownloadKind, FormatPolicy, Quality};

/// 可选的画质上限
const QUALITY_CHOICES: [u32; 6] = [4320, 2160, 1440, 1080, 720, 480];

/// 下载类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Kind {
    /// 视频 + 音频
    VideoAudio,
    /// 仅视频
    VideoOnly,
    /// 仅音频
    AudioOnly,
}

/// 音频编码
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AudioFormat {
    Mp3,
    M4a,
    Flac,
    Opus,
}

impl AudioFormat {
    fn as_str(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Flac => "flac",
            AudioFormat::Opus => "opus",
        }
    }
}

/// 影匣：批量视频下载
///
/// 示例用法：
///   yingxia https://www.youtube.com/watch?v=xxx
///   yingxia -f urls.txt -q 1080 -j 4
///   yingxia --kind audio-only --audio-format flac <url>
///   yingxia --info <url>
#[derive(Parser, Debug, Clone)]
#[command(name = "yingxia", version, about = "批量视频下载工具，基于 yt-dlp")]
pub struct Args {
    /// 要下载的链接，可以同时指定多个
    pub urls: Vec<String>,

    /// 包含链接列表的文件，每行一个
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// 下载目录，覆盖配置文件中的设置
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 同时下载的视频数 (1-10)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// 单个视频的分片并发数 (1-32)
    #[arg(long)]
    pub threads: Option<usize>,

    /// 画质：best、4320、2160、1440、1080、720、480
    #[arg(short, long, default_value = "best", value_parser = parse_quality)]
    pub quality: Quality,

    #[arg(long, value_enum, default_value_t = Kind::VideoAudio)]
    pub kind: Kind,

    #[arg(long, value_enum, default_value_t = AudioFormat::Mp3)]
    pub audio_format: AudioFormat,

    /// 音频质量，0 为最高
    #[arg(long, default_value = "0", value_parser = ["0", "320", "256", "192"])]
    pub audio_quality: String,

    /// 只下载单个视频，忽略播放列表
    #[arg(long)]
    pub no_playlist: bool,

    /// 下载并嵌入字幕
    #[arg(long)]
    pub subs: bool,

    /// 保持原始容器，不合并为 mkv
    #[arg(long)]
    pub keep_original: bool,

    /// 优先开放格式
    #[arg(long)]
    pub prefer_free_formats: bool,

    #[arg(long)]
    pub cookies_file: Option<PathBuf>,

    /// 从浏览器读取 cookies，如 chrome、firefox
    #[arg(long)]
    pub cookies_browser: Option<String>,

    #[arg(long)]
    pub proxy: Option<String>,

    /// ffmpeg 文件或所在目录
    #[arg(long)]
    pub ffmpeg: Option<PathBuf>,

    /// 只获取视频信息（最多 5 个链接）
    #[arg(long)]
    pub info: bool,

    /// 把本次的设置写回配置文件
    #[arg(long)]
    pub save: bool,

    /// 先更新 yt-dlp（yt-dlp -U）
    #[arg(long)]
    pub update_ytdlp: bool,
}

fn parse_quality(s: &str) -> Result<Quality, String> {
    let s = s.trim().to_ascii_lowercase();
    if s == "best" {
        return Ok(Quality::Best);
    }
    let height: u32 = s
        .trim_end_matches('p')
        .parse()
        .map_err(|_| format!("invalid quality: {s}"))?;
    if !QUALITY_CHOICES.contains(&height) {
        return Err(format!("quality must be one of best, {QUALITY_CHOICES:?}"));
    }
    Ok(Quality::MaxHeight(height))
}

impl Args {
    /// 配置文件路径
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(AppSettings::default_path)
    }

    /// 用命令行参数覆盖配置
    pub fn apply_to(&self, settings: &mut AppSettings) {
        if let Some(output) = &self.output {
            settings.download_path = output.clone();
        }
        if let Some(jobs) = self.jobs {
            settings.max_concurrent = jobs;
        }
        if let Some(threads) = self.threads {
            settings.thread_count = threads;
        }
        if let Some(file) = &self.cookies_file {
            settings.cookies_file = file.display().to_string();
        }
        if let Some(browser) = &self.cookies_browser {
            settings.cookies_browser = browser.clone();
        }
        if let Some(proxy) = &self.proxy {
            settings.proxy = proxy.clone();
        }
        if let Some(ffmpeg) = &self.ffmpeg {
            settings.ffmpeg_path = ffmpeg.display().to_string();
        }
        if self.prefer_free_formats {
            settings.prefer_free_formats = true;
        }
    }

    /// 格式选择策略
    pub fn format_policy(&self) -> FormatPolicy {
        let kind = match self.kind {
            Kind::VideoAudio => DownloadKind::VideoAudio,
            Kind::VideoOnly => DownloadKind::VideoOnly,
            Kind::AudioOnly => DownloadKind::AudioOnly {
                codec: self.audio_format.as_str().to_string(),
                quality: self.audio_quality.clone(),
            },
        };
        FormatPolicy {
            kind,
            quality: self.quality,
            keep_original: self.keep_original,
            embed_subtitles: self.subs,
            prefer_free_formats: self.prefer_free_formats,
        }
    }
}

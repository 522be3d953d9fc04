use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Cookies 来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CookieSource {
    /// Netscape 格式的 cookies 文件
    File(PathBuf),
    /// 从浏览器读取，如 `chrome`、`firefox`
    Browser(String),
}

impl CookieSource {
    /// 选择 cookies 来源：存在的文件优先于浏览器
    pub fn resolve(file: Option<&Path>, browser: Option<&str>) -> Option<Self> {
        if let Some(file) = file.filter(|f| !f.as_os_str().is_empty() && f.exists()) {
            return Some(CookieSource::File(file.to_path_buf()));
        }
        browser
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(|b| CookieSource::Browser(b.to_string()))
    }
}

/// 下载类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadKind {
    /// 视频 + 音频
    VideoAudio,
    /// 仅视频
    VideoOnly,
    /// 仅音频，提取为指定编码
    AudioOnly {
        /// `mp3`、`m4a`、`flac`、`opus`
        codec: String,
        /// `0` 表示最高质量，否则为码率（如 `320`）
        quality: String,
    },
}

/// 画质选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    /// 原始最高
    Best,
    /// 不超过给定高度
    MaxHeight(u32),
}

/// 格式选择策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatPolicy {
    pub kind: DownloadKind,
    pub quality: Quality,
    /// 保持原始容器，不合并为 mkv
    pub keep_original: bool,
    /// 下载并嵌入字幕
    pub embed_subtitles: bool,
    /// 优先 VP9/AV1/Opus 等开放格式
    pub prefer_free_formats: bool,
}

impl Default for FormatPolicy {
    fn default() -> Self {
        Self {
            kind: DownloadKind::VideoAudio,
            quality: Quality::Best,
            keep_original: false,
            embed_subtitles: false,
            prefer_free_formats: false,
        }
    }
}

/// 单个下载任务的配置
///
/// 每个任务都会拿到独立的副本，任务之间互不影响。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// 输出路径模板，如 `~/Downloads/%(title)s.%(ext)s`
    pub output_template: String,
    /// 单个视频的分片并发数
    pub concurrent_fragments: usize,
    /// 是否下载整个播放列表
    pub playlist: bool,
    pub cookies: Option<CookieSource>,
    pub proxy: Option<String>,
    /// 转码工具所在目录
    pub ffmpeg_location: Option<PathBuf>,
    pub format: FormatPolicy,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            output_template: "%(title)s.%(ext)s".to_string(),
            concurrent_fragments: 8,
            playlist: true,
            cookies: None,
            proxy: None,
            ffmpeg_location: None,
            format: FormatPolicy::default(),
        }
    }
}

impl JobConfig {
    /// 以目录生成默认输出模板
    pub fn with_output_dir(dir: impl Into<PathBuf>) -> Self {
        let template = dir.into().join("%(title)s.%(ext)s");
        Self {
            output_template: template.to_string_lossy().into_owned(),
            ..Default::default()
        }
    }
}

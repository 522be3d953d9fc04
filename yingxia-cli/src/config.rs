use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use yingxia_core::{CookieSource, FormatPolicy, JobConfig, MAX_WORKERS_RANGE};

/// 单个视频分片并发数的允许范围
pub const THREAD_COUNT_RANGE: std::ops::RangeInclusive<usize> = 1..=32;

/// 应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// 默认下载路径
    pub download_path: PathBuf,
    /// 代理地址，空字符串表示不使用
    pub proxy: String,
    /// 读取 cookies 的浏览器
    pub cookies_browser: String,
    /// cookies 文件，存在时优先于浏览器
    pub cookies_file: String,
    /// ffmpeg 文件或目录，空字符串表示从 PATH 查找
    pub ffmpeg_path: String,
    /// 同时下载的视频数
    pub max_concurrent: usize,
    /// 单个视频的分片并发数
    pub thread_count: usize,
    pub prefer_free_formats: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        // 获取用户下载目录
        let download_path = dirs::download_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            download_path,
            proxy: String::new(),
            cookies_browser: String::new(),
            cookies_file: String::new(),
            ffmpeg_path: String::new(),
            max_concurrent: 3,
            thread_count: 8,
            prefer_free_formats: false,
        }
    }
}

impl AppSettings {
    /// 默认配置文件位置
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("yingxia")
            .join("config.json")
    }

    /// 从文件加载配置，文件不存在时返回默认配置
    pub async fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs_err::tokio::read_to_string(path).await?;
            let settings: AppSettings = serde_json::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Self::default())
        }
    }

    /// 保存配置到文件
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs_err::tokio::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs_err::tokio::write(path, content).await?;
        Ok(())
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if !MAX_WORKERS_RANGE.contains(&self.max_concurrent) {
            anyhow::bail!(
                "max_concurrent must be between {} and {}",
                MAX_WORKERS_RANGE.start(),
                MAX_WORKERS_RANGE.end()
            );
        }
        if !THREAD_COUNT_RANGE.contains(&self.thread_count) {
            anyhow::bail!(
                "thread_count must be between {} and {}",
                THREAD_COUNT_RANGE.start(),
                THREAD_COUNT_RANGE.end()
            );
        }
        if self.download_path.as_os_str().is_empty() {
            anyhow::bail!("download_path must not be empty");
        }
        Ok(())
    }

    /// 生成单个任务的配置
    pub fn job_config(
        &self,
        format: FormatPolicy,
        playlist: bool,
        ffmpeg_location: Option<PathBuf>,
    ) -> JobConfig {
        let cookies_file = non_empty(&self.cookies_file).map(Path::new);
        let proxy = non_empty(&self.proxy).map(str::to_string);

        JobConfig {
            concurrent_fragments: self.thread_count,
            playlist,
            cookies: CookieSource::resolve(cookies_file, non_empty(&self.cookies_browser)),
            proxy,
            ffmpeg_location,
            format: FormatPolicy {
                prefer_free_formats: format.prefer_free_formats || self.prefer_free_formats,
                ..format
            },
            ..JobConfig::with_output_dir(&self.download_path)
        }
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

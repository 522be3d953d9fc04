use anyhow::{Context, Result, bail};
use fs_err::tokio as fs;
use std::{
    env::consts::EXE_SUFFIX,
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::process::Command;
use tracing::{debug, warn};

/// 转码工具
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: Option<PathBuf>,
    version: String,
    /// 是否来自用户配置的路径
    custom: bool,
}

impl Ffmpeg {
    /// 探测转码工具
    ///
    /// 优先使用配置的路径，无效时回退到 PATH 中的 `ffmpeg`。
    pub async fn detect(custom: Option<&Path>) -> Option<Self> {
        if let Some(path) = custom.filter(|p| !p.as_os_str().is_empty()) {
            match Self::from_custom(path).await {
                Ok(ffmpeg) => return Some(ffmpeg),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "Configured ffmpeg path is invalid, falling back to PATH"
                ),
            }
        }

        match Self::from_system().await {
            Ok(ffmpeg) => Some(ffmpeg),
            Err(e) => {
                debug!(error = %e, "ffmpeg not available");
                None
            }
        }
    }

    /// 使用配置的路径，可以是 `ffmpeg` 文件或其所在目录
    pub async fn from_custom(path: &Path) -> Result<Self> {
        let meta = fs::metadata(path).await?;
        let dir = if meta.is_dir() {
            path.to_path_buf()
        } else {
            path.parent().map(Path::to_path_buf).unwrap_or_default()
        };

        let ffmpeg = dir.join(exe_name("ffmpeg"));
        if fs::metadata(&ffmpeg).await.is_err() {
            bail!("ffmpeg not found in {}", dir.display());
        }
        let version = run_version(&ffmpeg).await?;

        let ffprobe = dir.join(exe_name("ffprobe"));
        let ffprobe = fs::metadata(&ffprobe).await.is_ok().then_some(ffprobe);

        Ok(Self {
            ffmpeg,
            ffprobe,
            version,
            custom: true,
        })
    }

    /// 使用 PATH 中的 `ffmpeg`
    pub async fn from_system() -> Result<Self> {
        let ffmpeg = which::which("ffmpeg").context("ffmpeg not found in PATH")?;
        let version = run_version(&ffmpeg).await?;
        Ok(Self {
            ffmpeg,
            ffprobe: which::which("ffprobe").ok(),
            version,
            custom: false,
        })
    }

    /// 交给下载工具的目录，仅在使用自定义路径时返回
    pub fn location(&self) -> Option<&Path> {
        if self.custom {
            self.ffmpeg.parent()
        } else {
            None
        }
    }

    pub fn ffmpeg(&self) -> &Path {
        &self.ffmpeg
    }

    pub fn ffprobe(&self) -> Option<&Path> {
        self.ffprobe.as_deref()
    }

    /// `-version` 输出的第一行
    pub fn version(&self) -> &str {
        &self.version
    }
}

fn exe_name(name: &str) -> String {
    format!("{name}{EXE_SUFFIX}")
}

async fn run_version(program: &Path) -> Result<String> {
    let output = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("failed to run {}", program.display()))?;
    if !output.status.success() {
        bail!("{} -version exited with {}", program.display(), output.status);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("yingxia-{name}-{}", uuid::Uuid::new_v4()));
        fs_err::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_missing_custom_path() {
        assert!(Ffmpeg::from_custom(Path::new("/definitely/not/here")).await.is_err());
    }

    #[tokio::test]
    async fn test_directory_without_ffmpeg() {
        let dir = temp_dir("empty");
        let err = Ffmpeg::from_custom(&dir).await.unwrap_err();
        assert!(err.to_string().contains("ffmpeg not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_custom_directory_and_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = temp_dir("ffmpeg");
        let script = dir.join("ffmpeg");
        fs_err::write(
            &script,
            "#!/bin/sh\necho 'ffmpeg version 6.1 Copyright (c) 2000-2023'\necho 'built with gcc'\n",
        )
        .unwrap();
        fs_err::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let from_dir = Ffmpeg::from_custom(&dir).await.unwrap();
        assert_eq!(from_dir.version(), "ffmpeg version 6.1 Copyright (c) 2000-2023");
        assert_eq!(from_dir.location(), Some(dir.as_path()));
        assert!(from_dir.ffprobe().is_none());

        let from_file = Ffmpeg::from_custom(&script).await.unwrap();
        assert_eq!(from_file.ffmpeg(), script.as_path());

        let detected = Ffmpeg::detect(Some(script.as_path())).await.unwrap();
        assert!(detected.location().is_some());
    }
}

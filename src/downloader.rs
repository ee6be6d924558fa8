use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Thin wrapper around the yt-dlp executable
#[derive(Debug, Clone)]
pub struct Downloader {
    executable: PathBuf,
    download_path: PathBuf,
    format: String,
    output_template: String,
}

impl Downloader {
    /// Fails when the executable does not exist, so the run stops before any API call
    pub fn new(
        executable: impl Into<PathBuf>,
        download_path: impl Into<PathBuf>,
        format: impl Into<String>,
        output_template: impl Into<String>,
    ) -> Result<Self> {
        let executable = executable.into();
        if !executable.is_file() {
            anyhow::bail!(
                "yt-dlp executable not found at {} (set YTDLP_PATH or --ytdlp)",
                executable.display()
            );
        }

        Ok(Self {
            executable,
            download_path: download_path.into(),
            format: format.into(),
            output_template: output_template.into(),
        })
    }

    fn args(&self, video_id: &str) -> Vec<OsString> {
        vec![
            "--path".into(),
            self.download_path.clone().into_os_string(),
            "--no-progress".into(),
            "--format".into(),
            self.format.clone().into(),
            "--output".into(),
            self.output_template.clone().into(),
            // `--` keeps ids starting with '-' from being read as flags
            "--".into(),
            video_id.into(),
        ]
    }

    /// Download one video. Ok(false) means yt-dlp ran but exited non-zero.
    pub async fn download(&self, video_id: &str) -> Result<bool> {
        tracing::info!("Downloading {} into {}", video_id, self.download_path.display());

        let status = Command::new(&self.executable)
            .args(self.args(video_id))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| format!("Failed to run {}", self.executable.display()))?;

        if status.success() {
            tracing::info!("Downloaded {}", video_id);
            Ok(true)
        } else {
            tracing::warn!("yt-dlp exited with {} for {}", status, video_id);
            Ok(false)
        }
    }
}

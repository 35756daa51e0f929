use async_trait::async_trait;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

use crate::config::MediaConfig;
use crate::error::{Result, SubforgeError};
use crate::process::CaptureLimits;
use super::{MediaCommandBuilder, MediaInfo, MediaToolkit};

/// Concrete implementation of the media toolkit (FFmpeg-based)
pub struct FfmpegToolkit {
    config: MediaConfig,
    command_builder: MediaCommandBuilder,
}

impl FfmpegToolkit {
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.binary_path, &config.probe_binary_path);

        Self {
            config,
            command_builder,
        }
    }

    fn limits(&self) -> CaptureLimits {
        CaptureLimits {
            stdout: self.config.max_output_bytes,
            stderr: self.config.max_output_bytes,
        }
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe(&self, media_path: &Path) -> Result<MediaInfo> {
        debug!("Probing {}", media_path.display());

        // Probe JSON is small, the stdout budget only guards against runaway output
        let output = self
            .command_builder
            .probe_streams(media_path)
            .execute(self.config.probe_timeout(), self.limits())
            .await?
            .ensure_success("Media probe")?;

        serde_json::from_str(&output.stdout)
            .map_err(|e| SubforgeError::external("Media probe", format!("unreadable probe output: {}", e)))
    }

    async fn render(&self, media_path: &Path, video_filter: &str, output_path: &Path) -> Result<()> {
        info!("Rendering {} -> {}", media_path.display(), output_path.display());

        let command = self.command_builder.render(
            media_path,
            video_filter,
            output_path,
            &self.config.render_options,
        );
        command
            .execute(self.config.render_timeout(), self.limits())
            .await?
            .ensure_success("Renderer")?;

        let size = tokio::fs::metadata(output_path).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(SubforgeError::external("Renderer", "produced an empty output file"));
        }

        info!("Render completed ({} bytes)", size);
        Ok(())
    }

    fn check_availability(&self) -> Result<()> {
        let version = self.command_builder.version_check();
        let output = Command::new(&version.binary_path)
            .args(&version.args)
            .output()
            .map_err(|e| SubforgeError::external("Renderer", format!("not found: {}", e)))?;

        if output.status.success() {
            info!("Media processor is available");
            Ok(())
        } else {
            Err(SubforgeError::external("Renderer", "version check failed"))
        }
    }
}

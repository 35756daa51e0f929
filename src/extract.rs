//! Subtitle extraction service contract.

use async_trait::async_trait;
use std::path::Path;
use tracing::info;

use crate::config::ExtractorConfig;
use crate::error::{Result, SubforgeError};
use crate::process::{render_args, run_captured, CaptureLimits};

const SERVICE: &str = "Extraction";

/// Produces a subtitle document for a media file.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubtitleExtractor: Send + Sync {
    async fn extract(&self, media_path: &Path, language_hint: &str) -> Result<String>;
}

/// Runs the configured extraction program and reads the document from stdout.
pub struct ProcessExtractor {
    config: ExtractorConfig,
}

impl ProcessExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SubtitleExtractor for ProcessExtractor {
    async fn extract(&self, media_path: &Path, language_hint: &str) -> Result<String> {
        info!("Extracting subtitles from {}", media_path.display());

        let media = media_path.to_string_lossy().to_string();
        let args = render_args(&self.config.args, &[("media", media.as_str()), ("language", language_hint)]);
        let limits = CaptureLimits {
            stdout: self.config.max_output_bytes,
            ..CaptureLimits::default()
        };

        let output = run_captured(SERVICE, &self.config.program, &args, self.config.timeout(), limits)
            .await?
            .ensure_success(SERVICE)?;

        if output.stdout_truncated {
            return Err(SubforgeError::external(
                SERVICE,
                format!("output exceeded {} bytes", self.config.max_output_bytes),
            ));
        }
        if output.stdout.trim().is_empty() {
            return Err(SubforgeError::external(SERVICE, "empty output"));
        }

        info!("Extraction produced {} bytes", output.stdout.len());
        Ok(output.stdout)
    }
}

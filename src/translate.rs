//! Subtitle translation service contract.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::TranslatorConfig;
use crate::error::{Result, SubforgeError};
use crate::process::{render_args, run_captured, CaptureLimits};
use crate::storage::{non_empty_file, ArtifactStore};

const SERVICE: &str = "Translation";

/// Translates a subtitle document on disk.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubtitleTranslator: Send + Sync {
    /// Returns the path of the translated document written next to `subtitle_path`.
    async fn translate(&self, subtitle_path: &Path, target_language: &str) -> Result<PathBuf>;
}

/// Runs the configured translation program, which writes `<stem>_<lang>.srt`.
pub struct ProcessTranslator {
    config: TranslatorConfig,
}

impl ProcessTranslator {
    pub fn new(config: TranslatorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SubtitleTranslator for ProcessTranslator {
    async fn translate(&self, subtitle_path: &Path, target_language: &str) -> Result<PathBuf> {
        info!("Translating {} to {}", subtitle_path.display(), target_language);

        let input = subtitle_path.to_string_lossy().to_string();
        let args = render_args(&self.config.args, &[("input", input.as_str()), ("lang", target_language)]);

        run_captured(SERVICE, &self.config.program, &args, self.config.timeout(), CaptureLimits::default())
            .await?
            .ensure_success(SERVICE)?;

        let translated = ArtifactStore::translated_path(subtitle_path, target_language);
        if !non_empty_file(&translated).await {
            return Err(SubforgeError::external(
                SERVICE,
                format!("{} was not produced", translated.display()),
            ));
        }

        info!("Translation written to {}", translated.display());
        Ok(translated)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn translator(script: &str) -> ProcessTranslator {
        let mut config = crate::config::Config::default().translator;
        config.program = "sh".to_string();
        config.args = vec!["-c".to_string(), script.to_string(), "translate".to_string(), "{input}".to_string(), "{lang}".to_string()];
        config.timeout_secs = 5;
        ProcessTranslator::new(config)
    }

    #[tokio::test]
    async fn test_translated_file_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.srt");
        std::fs::write(&input, "1\n00:00:00,000 --> 00:00:01,000\nhi\n").unwrap();

        let translator = translator(r#"sed 's/hi/mingalaba/' "$1" > "${1%.srt}_$2.srt""#);
        let out = translator.translate(&input, "my").await.unwrap();

        assert_eq!(out, dir.path().join("clip_my.srt"));
        assert!(std::fs::read_to_string(out).unwrap().contains("mingalaba"));
    }

    #[tokio::test]
    async fn test_missing_output_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.srt");
        std::fs::write(&input, "x").unwrap();

        let err = translator("exit 0").translate(&input, "my").await.unwrap_err();
        assert!(err.to_string().starts_with("Translation failed"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.srt");
        std::fs::write(&input, "x").unwrap();

        assert!(translator("exit 3").translate(&input, "my").await.is_err());
    }
}

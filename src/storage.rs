//! Artifact layout on disk and removal of a job's files.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::error::{Result, SubforgeError};

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    uploads_dir: PathBuf,
    exports_dir: PathBuf,
    public_base_url: String,
}

impl ArtifactStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            uploads_dir: config.uploads_dir.clone(),
            exports_dir: config.exports_dir.clone(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn exports_dir(&self) -> &Path {
        &self.exports_dir
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.uploads_dir, &self.exports_dir] {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| SubforgeError::Storage(format!("cannot create {}: {}", dir.display(), e)))?;
        }
        Ok(())
    }

    /// `<uploads>/<media-stem>.srt`
    pub fn subtitle_path(&self, media_path: &Path) -> PathBuf {
        self.uploads_dir.join(format!("{}.srt", media_stem(media_path)))
    }

    /// Translated variant written next to the subtitle artifact.
    pub fn translated_path(subtitle_path: &Path, language: &str) -> PathBuf {
        let stem = subtitle_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        subtitle_path.with_file_name(format!("{}_{}.srt", stem, language))
    }

    /// `<exports>/<media-stem>_subtitled.mp4`
    pub fn export_path(&self, media_path: &Path) -> PathBuf {
        self.exports_dir
            .join(format!("{}_subtitled.mp4", media_stem(media_path)))
    }

    /// Retrieval URL for a file under the exports directory.
    pub fn export_url(&self, export_path: &Path) -> String {
        let name = export_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        format!("{}/exports/{}", self.public_base_url, name)
    }

    /// Write an artifact and verify it landed non-empty.
    pub async fn write_verified(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SubforgeError::Storage(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        fs::write(path, content)
            .await
            .map_err(|e| SubforgeError::Storage(format!("cannot write {}: {}", path.display(), e)))?;

        if non_empty_file(path).await {
            Ok(())
        } else {
            Err(SubforgeError::Storage(format!("{} is empty after write", path.display())))
        }
    }

    /// Remove files, ignoring ones already gone. Returns how many were removed.
    pub async fn remove_all(&self, paths: &[PathBuf]) -> usize {
        let mut removed = 0;
        for path in paths {
            match fs::remove_file(path).await {
                Ok(()) => {
                    debug!("Removed {}", path.display());
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        removed
    }
}

pub async fn non_empty_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

fn media_stem(media_path: &Path) -> String {
    media_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "media".to_string())
}

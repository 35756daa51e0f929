// Media toolkit
//
// Thin abstraction over the external media tools:
// - Commands: argument builders with timed, bounded execution
// - Processor: ffmpeg/ffprobe implementation of the toolkit trait

pub mod commands;
pub mod processor;

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

pub use commands::*;
pub use processor::*;

use crate::config::MediaConfig;
use crate::error::Result;
use crate::subtitle::Resolution;

/// One stream as reported by the prober.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StreamInfo {
    pub codec_type: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MediaInfo {
    #[serde(default)]
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    /// Well-formed media carries at least one audio or video stream.
    pub fn is_playable(&self) -> bool {
        self.streams
            .iter()
            .any(|s| s.codec_type == "video" || s.codec_type == "audio")
    }

    pub fn has_subtitle_stream(&self) -> bool {
        self.streams.iter().any(|s| s.codec_type == "subtitle")
    }

    /// Dimensions of the first video stream.
    pub fn resolution(&self) -> Option<Resolution> {
        self.streams
            .iter()
            .filter(|s| s.codec_type == "video")
            .find_map(|s| match (s.width, s.height) {
                (Some(width), Some(height)) if width > 0 && height > 0 => {
                    Some(Resolution { width, height })
                }
                _ => None,
            })
    }
}

/// Main trait for media operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Inspect the streams of a media file
    async fn probe(&self, media_path: &Path) -> Result<MediaInfo>;

    /// Render `media_path` through a video filter into `output_path`
    async fn render(&self, media_path: &Path, video_filter: &str, output_path: &Path) -> Result<()>;

    /// Check if the media tools are available
    fn check_availability(&self) -> Result<()>;
}

/// Factory for creating media toolkit instances
pub struct MediaToolkitFactory;

impl MediaToolkitFactory {
    /// Create the default toolkit implementation (FFmpeg-based)
    pub fn create_toolkit(config: MediaConfig) -> Arc<dyn MediaToolkit> {
        Arc::new(processor::FfmpegToolkit::new(config))
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::{Result, SubforgeError};

// Default values for sections that older config files may omit
fn default_bus_capacity() -> usize {
    256
}

fn default_sync_initial_delay_secs() -> u64 {
    30
}

fn default_sync_interval_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub extractor: ExtractorConfig,
    pub translator: TranslatorConfig,
    pub media: MediaConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding uploaded media and subtitle artifacts
    pub uploads_dir: PathBuf,
    /// Directory receiving rendered exports
    pub exports_dir: PathBuf,
    /// Base URL under which `exports_dir` is served, without trailing slash
    pub public_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Extraction program (e.g., python)
    pub program: String,
    /// Argument template; `{media}` and `{language}` are substituted
    pub args: Vec<String>,
    /// Source-language hint passed to the extractor
    pub source_language: String,
    /// Timeout in seconds for one extraction run
    pub timeout_secs: u64,
    /// Maximum number of stdout bytes retained
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    /// Translation program
    pub program: String,
    /// Argument template; `{input}` and `{lang}` are substituted
    pub args: Vec<String>,
    /// Timeout in seconds for one translation run
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Path to ffprobe binary
    pub probe_binary_path: String,
    /// Directory searched for a .ttf/.otf used by the overlay strategy
    pub fonts_dir: PathBuf,
    /// Additional encoding options appended to every render
    /// Common options: ["-preset", "medium", "-crf", "23", "-pix_fmt", "yuv420p"]
    pub render_options: Vec<String>,
    /// Render timeout in seconds
    pub render_timeout_secs: u64,
    /// Probe timeout in seconds
    pub probe_timeout_secs: u64,
    /// Maximum number of stderr bytes retained from media commands
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Broadcast channel capacity; slow subscribers skip older events
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// OAuth2 token endpoint used for the refresh-token grant
    pub token_url: String,
    /// Remote files listing endpoint
    pub listing_url: String,
    /// OAuth2 client id (falls back to SUBFORGE_CLIENT_ID)
    #[serde(default)]
    pub client_id: Option<String>,
    /// OAuth2 client secret (falls back to SUBFORGE_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Delay before the first pass after startup
    #[serde(default = "default_sync_initial_delay_secs")]
    pub initial_delay_secs: u64,
    /// Interval between passes
    #[serde(default = "default_sync_interval_secs")]
    pub interval_secs: u64,
    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            listing_url: "https://www.googleapis.com/drive/v3/files".to_string(),
            client_id: None,
            client_secret: None,
            initial_delay_secs: default_sync_initial_delay_secs(),
            interval_secs: default_sync_interval_secs(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                uploads_dir: PathBuf::from("uploads"),
                exports_dir: PathBuf::from("uploads/exports"),
                public_base_url: "http://localhost:5001/uploads".to_string(),
            },
            extractor: ExtractorConfig {
                program: "python".to_string(),
                args: vec![
                    "python/extract_srt.py".to_string(),
                    "{media}".to_string(),
                    "--language".to_string(),
                    "{language}".to_string(),
                ],
                source_language: "en".to_string(),
                timeout_secs: 30 * 60,
                max_output_bytes: 16 * 1024 * 1024,
            },
            translator: TranslatorConfig {
                program: "python".to_string(),
                args: vec![
                    "python/translate_text.py".to_string(),
                    "{input}".to_string(),
                    "{lang}".to_string(),
                ],
                timeout_secs: 5 * 60,
            },
            media: MediaConfig {
                binary_path: "ffmpeg".to_string(),
                probe_binary_path: "ffprobe".to_string(),
                fonts_dir: PathBuf::from("fonts"),
                render_options: vec![
                    // "-preset".to_string(), "medium".to_string(),
                    // "-crf".to_string(), "23".to_string(),
                ],
                render_timeout_secs: 20 * 60,
                probe_timeout_secs: 30,
                max_output_bytes: 64 * 1024,
            },
            notify: NotifyConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SubforgeError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| SubforgeError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SubforgeError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| SubforgeError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}

impl ExtractorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl TranslatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl MediaConfig {
    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl SyncConfig {
    /// Client credentials from the file, falling back to the environment.
    pub fn client_credentials(&self) -> Result<(String, String)> {
        let id = self
            .client_id
            .clone()
            .or_else(|| std::env::var("SUBFORGE_CLIENT_ID").ok())
            .ok_or_else(|| SubforgeError::Config("sync.client_id is not set".to_string()))?;
        let secret = self
            .client_secret
            .clone()
            .or_else(|| std::env::var("SUBFORGE_CLIENT_SECRET").ok())
            .ok_or_else(|| SubforgeError::Config("sync.client_secret is not set".to_string()))?;
        Ok((id, secret))
    }
}

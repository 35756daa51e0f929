use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubforgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Bad or missing input at enqueue or export time.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Extraction, translation, rendering, probing, credential exchange or listing failed.
    #[error("{service} failed: {message}")]
    ExternalService { service: String, message: String },

    /// Artifact write, stat or read failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A second pipeline run was requested while one is still active for the job.
    #[error("Job {0} already has an active pipeline run")]
    Race(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SubforgeError {
    pub fn external<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SubforgeError>;

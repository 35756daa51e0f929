//! Job records and the store they live in.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Result, SubforgeError};
use crate::subtitle::StyleConfig;

pub const DEFAULT_JOB_NAME: &str = "Unnamed Project";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = SubforgeError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SubforgeError::Validation(format!("invalid job id '{}': {}", s, e)))
    }
}

/// Status of a job. `Failed` is announced on the bus but never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub owner_id: String,
    pub name: String,
    pub media_path: PathBuf,
    pub subtitle_ref: Option<PathBuf>,
    pub exported_ref: Option<PathBuf>,
    pub style: StyleConfig,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(owner_id: &str, name: Option<&str>, media_path: PathBuf, style: StyleConfig) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            owner_id: owner_id.to_string(),
            name: name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or(DEFAULT_JOB_NAME)
                .to_string(),
            media_path,
            subtitle_ref: None,
            exported_ref: None,
            style,
            status: JobStatus::Processing,
            progress: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            status: self.status,
            progress: self.progress,
            subtitle_ref: self.subtitle_ref.clone(),
        }
    }
}

/// Pull-based status answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub status: JobStatus,
    pub progress: u8,
    pub subtitle_ref: Option<PathBuf>,
}

/// Storage for job records. Updates are last-write-wins per field.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: Job) -> Result<()>;

    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Job>>;

    /// Raise progress of a processing job; lower values are ignored.
    async fn advance_progress(&self, id: JobId, progress: u8) -> Result<u8>;

    /// Mark completed with progress 100.
    async fn complete(&self, id: JobId, subtitle_ref: PathBuf) -> Result<Job>;

    /// Put a finished job back into processing at progress 0 for a fresh run.
    async fn restart(&self, id: JobId) -> Result<Job>;

    async fn set_exported(&self, id: JobId, exported_ref: PathBuf) -> Result<()>;

    async fn set_style(&self, id: JobId, style: StyleConfig) -> Result<()>;

    async fn remove(&self, id: JobId) -> Result<Option<Job>>;
}

/// In-process job store.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<T: Send>(&self, id: JobId, f: impl FnOnce(&mut Job) -> T + Send) -> Result<T> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| SubforgeError::NotFound(format!("job {}", id)))?;
        let out = f(job);
        job.updated_at = Utc::now();
        Ok(out)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(SubforgeError::Validation(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut owned: Vec<Job> = jobs
            .values()
            .filter(|j| j.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by_key(|j| j.created_at);
        Ok(owned)
    }

    async fn advance_progress(&self, id: JobId, progress: u8) -> Result<u8> {
        self.update(id, |job| {
            if job.status == JobStatus::Processing {
                job.progress = job.progress.max(progress.min(100));
            }
            job.progress
        })
        .await
    }

    async fn complete(&self, id: JobId, subtitle_ref: PathBuf) -> Result<Job> {
        self.update(id, |job| {
            job.subtitle_ref = Some(subtitle_ref);
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.clone()
        })
        .await
    }

    async fn restart(&self, id: JobId) -> Result<Job> {
        self.update(id, |job| {
            job.status = JobStatus::Processing;
            job.progress = 0;
            job.clone()
        })
        .await
    }

    async fn set_exported(&self, id: JobId, exported_ref: PathBuf) -> Result<()> {
        self.update(id, |job| job.exported_ref = Some(exported_ref)).await
    }

    async fn set_style(&self, id: JobId, style: StyleConfig) -> Result<()> {
        self.update(id, |job| job.style = style).await
    }

    async fn remove(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.write().await.remove(&id))
    }
}

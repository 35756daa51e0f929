//! Local cache of remote file metadata.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::remote::RemoteFile;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedRemoteFile {
    pub owner_id: String,
    pub file_id: String,
    pub name: String,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
    pub modified_time: Option<DateTime<Utc>>,
    pub web_view_link: Option<String>,
    pub created_at: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
}

/// Records keyed by (owner, remote file id).
#[async_trait]
pub trait RemoteFileCache: Send + Sync {
    async fn upsert(&self, owner_id: &str, file: &RemoteFile, synced_at: DateTime<Utc>) -> Result<CachedRemoteFile>;

    async fn list(&self, owner_id: &str) -> Result<Vec<CachedRemoteFile>>;
}

#[derive(Default)]
pub struct InMemoryRemoteFileCache {
    records: RwLock<HashMap<(String, String), CachedRemoteFile>>,
}

impl InMemoryRemoteFileCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteFileCache for InMemoryRemoteFileCache {
    async fn upsert(&self, owner_id: &str, file: &RemoteFile, synced_at: DateTime<Utc>) -> Result<CachedRemoteFile> {
        let key = (owner_id.to_string(), file.id.clone());
        let mut records = self.records.write().await;
        let created_at = records.get(&key).map(|r| r.created_at).unwrap_or(synced_at);

        let record = CachedRemoteFile {
            owner_id: owner_id.to_string(),
            file_id: file.id.clone(),
            name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            size: file.size_bytes(),
            modified_time: file.modified_time,
            web_view_link: file.web_view_link.clone(),
            created_at,
            synced_at,
        };
        records.insert(key, record.clone());
        Ok(record)
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<CachedRemoteFile>> {
        let records = self.records.read().await;
        let mut owned: Vec<CachedRemoteFile> = records
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.file_id.cmp(&b.file_id)));
        Ok(owned)
    }
}

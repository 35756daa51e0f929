//! Remote storage listing of an owner's video files.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::{Result, SubforgeError};

const SERVICE: &str = "Remote listing";
const VIDEO_QUERY: &str = "mimeType contains 'video/' and trashed=false";
const FIELDS: &str = "files(id, name, mimeType, size, modifiedTime, webViewLink)";
const PAGE_SIZE: &str = "1000";

/// File metadata as returned by the listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Byte size, sent as a decimal string
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub web_view_link: Option<String>,
}

impl RemoteFile {
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(|s| s.trim().parse().ok())
    }
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteFile>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteListing: Send + Sync {
    /// Video files visible to the holder of `access_token`, trashed ones excluded.
    async fn list_videos(&self, access_token: &str) -> Result<Vec<RemoteFile>>;
}

/// Drive v3 style `files.list` client.
pub struct DriveListing {
    client: Client,
    listing_url: String,
}

impl DriveListing {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        Ok(Self {
            client: super::credentials::http_client(config)?,
            listing_url: config.listing_url.clone(),
        })
    }
}

#[async_trait]
impl RemoteListing for DriveListing {
    async fn list_videos(&self, access_token: &str) -> Result<Vec<RemoteFile>> {
        let response = self
            .client
            .get(&self.listing_url)
            .bearer_auth(access_token)
            .query(&[
                ("q", VIDEO_QUERY),
                ("spaces", "drive"),
                ("fields", FIELDS),
                ("pageSize", PAGE_SIZE),
            ])
            .send()
            .await
            .map_err(|e| SubforgeError::external(SERVICE, e.to_string()))?;

        if !response.status().is_success() {
            return Err(SubforgeError::external(
                SERVICE,
                format!("listing returned {}", response.status()),
            ));
        }

        let list: FileList = response
            .json()
            .await
            .map_err(|e| SubforgeError::external(SERVICE, format!("unreadable listing: {}", e)))?;
        debug!("Listing returned {} files", list.files.len());
        Ok(list.files)
    }
}

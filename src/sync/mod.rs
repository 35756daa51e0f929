// Remote file cache sync
//
// Periodically mirrors each owner's remote video listing into the local cache:
// - Credentials: stored long-lived credentials and access-credential refresh
// - Remote: the listing client
// - Cache: records keyed by owner and remote file id

pub mod cache;
pub mod credentials;
pub mod remote;

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

pub use cache::{CachedRemoteFile, InMemoryRemoteFileCache, RemoteFileCache};
pub use credentials::{
    AccessCredential, CredentialExchange, CredentialProvider, CredentialStore, InMemoryCredentialStore,
    OAuthExchange, TokenGrant,
};
pub use remote::{DriveListing, RemoteFile, RemoteListing};

use crate::config::SyncConfig;
use crate::error::Result;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub owners_synced: usize,
    pub owners_failed: usize,
    pub files_upserted: usize,
}

pub struct CacheSync {
    credentials: Arc<CredentialProvider>,
    listing: Arc<dyn RemoteListing>,
    cache: Arc<dyn RemoteFileCache>,
    initial_delay: Duration,
    interval: Duration,
}

impl CacheSync {
    pub fn new(
        credentials: Arc<CredentialProvider>,
        listing: Arc<dyn RemoteListing>,
        cache: Arc<dyn RemoteFileCache>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            credentials,
            listing,
            cache,
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            interval: Duration::from_secs(config.interval_secs.max(1)),
        }
    }

    /// Reconcile every owner holding a credential. One owner failing never stops the others.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let owners = self.credentials.owners().await?;
        let mut report = SyncReport::default();

        for owner_id in owners {
            match self.sync_owner(&owner_id).await {
                Ok(upserted) => {
                    info!(owner_id = %owner_id, "Remote sync: {} files", upserted);
                    report.owners_synced += 1;
                    report.files_upserted += upserted;
                }
                Err(e) => {
                    warn!(owner_id = %owner_id, "Remote sync failed: {}", e);
                    report.owners_failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn sync_owner(&self, owner_id: &str) -> Result<usize> {
        let token = self.credentials.access_token(owner_id).await?;
        let files = self.listing.list_videos(&token).await?;

        let synced_at = Utc::now();
        let mut upserted = 0;
        for file in &files {
            match self.cache.upsert(owner_id, file, synced_at).await {
                Ok(_) => upserted += 1,
                Err(e) => warn!(owner_id, file_id = %file.id, "Failed to cache remote file: {}", e),
            }
        }
        Ok(upserted)
    }

    /// Run passes after the initial delay and then on every interval until `shutdown` flips to true.
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.initial_delay, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                match self.sync_all().await {
                    Ok(report) => info!(
                        owners_synced = report.owners_synced,
                        owners_failed = report.owners_failed,
                        files_upserted = report.files_upserted,
                        "Remote sync pass finished"
                    ),
                    Err(e) => error!("Remote sync pass failed: {}", e),
                }
            }
            info!("Remote sync stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::credentials::MockCredentialExchange;
    use super::remote::MockRemoteListing;
    use super::*;
    use crate::error::SubforgeError;
    use chrono::Duration as ChronoDuration;

    fn remote(id: &str) -> RemoteFile {
        RemoteFile {
            id: id.to_string(),
            name: format!("{}.mp4", id),
            mime_type: Some("video/mp4".to_string()),
            size: Some("10".to_string()),
            modified_time: None,
            web_view_link: None,
        }
    }

    async fn sync_with(listing: MockRemoteListing, config: &SyncConfig) -> (Arc<CacheSync>, Arc<InMemoryRemoteFileCache>) {
        let store = Arc::new(InMemoryCredentialStore::new());
        store.store("o1", "r1").await.unwrap();
        store.store("o2", "r2").await.unwrap();

        let mut exchange = MockCredentialExchange::new();
        exchange.expect_exchange().returning(|refresh| {
            Ok(TokenGrant {
                access: AccessCredential {
                    token: format!("access-{}", refresh),
                    expires_at: Utc::now() + ChronoDuration::hours(1),
                },
                refresh_token: None,
            })
        });

        let cache = Arc::new(InMemoryRemoteFileCache::new());
        let provider = Arc::new(CredentialProvider::new(store, Arc::new(exchange)));
        let sync = Arc::new(CacheSync::new(provider, Arc::new(listing), cache.clone(), config));
        (sync, cache)
    }

    #[tokio::test]
    async fn test_failing_owner_does_not_block_others() {
        let mut listing = MockRemoteListing::new();
        listing.expect_list_videos().returning(|token| {
            if token == "access-r1" {
                Err(SubforgeError::external("Remote listing", "listing returned 500"))
            } else {
                Ok(vec![remote("a"), remote("b")])
            }
        });

        let (sync, cache) = sync_with(listing, &SyncConfig::default()).await;
        let report = sync.sync_all().await.unwrap();

        assert_eq!(
            report,
            SyncReport {
                owners_synced: 1,
                owners_failed: 1,
                files_upserted: 2
            }
        );
        assert!(cache.list("o1").await.unwrap().is_empty());
        assert_eq!(cache.list("o2").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_pass_upserts_in_place() {
        let mut listing = MockRemoteListing::new();
        listing.expect_list_videos().returning(|_| Ok(vec![remote("a")]));

        let (sync, cache) = sync_with(listing, &SyncConfig::default()).await;
        sync.sync_all().await.unwrap();
        sync.sync_all().await.unwrap();

        assert_eq!(cache.list("o2").await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_after_delay_and_stops_on_shutdown() {
        let mut listing = MockRemoteListing::new();
        listing.expect_list_videos().returning(|_| Ok(vec![remote("a")]));
        let config = SyncConfig {
            initial_delay_secs: 30,
            interval_secs: 600,
            ..SyncConfig::default()
        };

        let (sync, cache) = sync_with(listing, &config).await;
        let (tx, rx) = watch::channel(false);
        let handle = sync.start(rx);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(cache.list("o1").await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(cache.list("o1").await.unwrap().len(), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}

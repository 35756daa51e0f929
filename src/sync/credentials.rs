//! Long-lived owner credentials and short-lived access credentials.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::error::{Result, SubforgeError};

const SERVICE: &str = "Credential exchange";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
// Access credentials this close to expiry are refreshed early
const EXPIRY_MARGIN_SECS: i64 = 60;
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Persistence for each owner's long-lived credential.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Owners that currently hold a long-lived credential.
    async fn owners(&self) -> Result<Vec<String>>;

    async fn get(&self, owner_id: &str) -> Result<Option<String>>;

    async fn store(&self, owner_id: &str, refresh_token: &str) -> Result<()>;
}

#[derive(Debug, Default, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    owners: BTreeMap<String, String>,
}

#[derive(Default)]
pub struct InMemoryCredentialStore {
    tokens: RwLock<BTreeMap<String, String>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `[owners]` entries (`owner-id = "refresh-token"`) from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let file: CredentialsFile = toml::from_str(&content)?;
        let tokens = file
            .owners
            .into_iter()
            .filter(|(_, token)| !token.trim().is_empty())
            .collect();
        Ok(Self {
            tokens: RwLock::new(tokens),
        })
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn owners(&self) -> Result<Vec<String>> {
        Ok(self.tokens.read().await.keys().cloned().collect())
    }

    async fn get(&self, owner_id: &str) -> Result<Option<String>> {
        Ok(self.tokens.read().await.get(owner_id).cloned())
    }

    async fn store(&self, owner_id: &str, refresh_token: &str) -> Result<()> {
        self.tokens
            .write()
            .await
            .insert(owner_id.to_string(), refresh_token.to_string());
        Ok(())
    }
}

/// Short-lived credential used for remote listing calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCredential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessCredential {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - ChronoDuration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

/// Outcome of exchanging a long-lived credential.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access: AccessCredential,
    /// Replacement long-lived credential, when the issuer rotated it
    pub refresh_token: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn exchange(&self, refresh_token: &str) -> Result<TokenGrant>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// OAuth2 refresh-token grant against a token endpoint.
pub struct OAuthExchange {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl OAuthExchange {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let (client_id, client_secret) = config.client_credentials()?;
        Ok(Self {
            client: http_client(config)?,
            token_url: config.token_url.clone(),
            client_id,
            client_secret,
        })
    }
}

#[async_trait]
impl CredentialExchange for OAuthExchange {
    async fn exchange(&self, refresh_token: &str) -> Result<TokenGrant> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| SubforgeError::external(SERVICE, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(SubforgeError::external(SERVICE, format!("token endpoint returned {}", status)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SubforgeError::external(SERVICE, format!("unreadable token response: {}", e)))?;

        let expires_in = token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        Ok(TokenGrant {
            access: AccessCredential {
                token: token.access_token,
                expires_at: Utc::now() + ChronoDuration::seconds(expires_in as i64),
            },
            refresh_token: token.refresh_token,
        })
    }
}

pub(crate) fn http_client(config: &SyncConfig) -> Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .map_err(|e| SubforgeError::Config(format!("failed to create HTTP client: {}", e)))
}

/// Hands out access credentials, exchanging only when the cached one is stale.
pub struct CredentialProvider {
    store: Arc<dyn CredentialStore>,
    exchange: Arc<dyn CredentialExchange>,
    cached: Mutex<HashMap<String, AccessCredential>>,
}

impl CredentialProvider {
    pub fn new(store: Arc<dyn CredentialStore>, exchange: Arc<dyn CredentialExchange>) -> Self {
        Self {
            store,
            exchange,
            cached: Mutex::new(HashMap::new()),
        }
    }

    pub async fn owners(&self) -> Result<Vec<String>> {
        self.store.owners().await
    }

    pub async fn access_token(&self, owner_id: &str) -> Result<String> {
        if let Some(credential) = self.cached.lock().await.get(owner_id) {
            if credential.is_fresh(Utc::now()) {
                debug!(owner_id, "Using cached access credential");
                return Ok(credential.token.clone());
            }
        }

        let refresh_token = self
            .store
            .get(owner_id)
            .await?
            .ok_or_else(|| SubforgeError::NotFound(format!("credential for owner {}", owner_id)))?;

        let grant = self.exchange.exchange(&refresh_token).await?;
        info!(owner_id, "Refreshed access credential");

        if let Some(rotated) = grant.refresh_token.as_deref().filter(|t| *t != refresh_token) {
            self.store.store(owner_id, rotated).await?;
        }

        let token = grant.access.token.clone();
        self.cached.lock().await.insert(owner_id.to_string(), grant.access);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn grant(token: &str, expires_in: i64) -> TokenGrant {
        TokenGrant {
            access: AccessCredential {
                token: token.to_string(),
                expires_at: Utc::now() + ChronoDuration::seconds(expires_in),
            },
            refresh_token: None,
        }
    }

    async fn store_with(owner: &str, token: &str) -> Arc<InMemoryCredentialStore> {
        let store = Arc::new(InMemoryCredentialStore::new());
        store.store(owner, token).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_fresh_credential_is_reused() {
        let mut exchange = MockCredentialExchange::new();
        exchange.expect_exchange().times(1).returning(|_| Ok(grant("a1", 3600)));

        let provider = CredentialProvider::new(store_with("o1", "r1").await, Arc::new(exchange));
        assert_eq!(provider.access_token("o1").await.unwrap(), "a1");
        assert_eq!(provider.access_token("o1").await.unwrap(), "a1");
    }

    #[tokio::test]
    async fn test_expiring_credential_is_refreshed() {
        let mut exchange = MockCredentialExchange::new();
        exchange.expect_exchange().times(2).returning(|_| Ok(grant("short", 30)));

        let provider = CredentialProvider::new(store_with("o1", "r1").await, Arc::new(exchange));
        provider.access_token("o1").await.unwrap();
        provider.access_token("o1").await.unwrap();
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_stored() {
        let mut exchange = MockCredentialExchange::new();
        exchange.expect_exchange().returning(|_| {
            let mut g = grant("a1", 3600);
            g.refresh_token = Some("r2".to_string());
            Ok(g)
        });

        let store = store_with("o1", "r1").await;
        let provider = CredentialProvider::new(store.clone(), Arc::new(exchange));
        provider.access_token("o1").await.unwrap();

        assert_eq!(store.get("o1").await.unwrap().as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_unknown_owner_is_not_found() {
        let provider = CredentialProvider::new(
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(MockCredentialExchange::new()),
        );
        let err = provider.access_token("nobody").await.unwrap_err();
        assert!(matches!(err, SubforgeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_store_loads_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[owners]\nalice = \"r-alice\"\nbob = \"\"\ncarol = \"r-carol\"").unwrap();

        let store = InMemoryCredentialStore::from_file(file.path()).unwrap();
        assert_eq!(store.owners().await.unwrap(), vec!["alice", "carol"]);
    }
}

//! Credentials for the Firestore REST API.
//!
//! Outside the emulator every request carries an OAuth bearer token. On
//! Google Cloud the token comes from the instance metadata server and lives
//! about an hour; it is cached and fetched again shortly before it expires.
//! Reference: https://cloud.google.com/compute/docs/access/authenticate-workloads#applications

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::info;

use super::StoreError;

/// Tokens are refreshed this long before the metadata server says they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";

/// How requests to the store are authorized.
pub enum Credentials {
    /// No `Authorization` header (emulator).
    Anonymous,
    /// A fixed token, for local runs against a real project.
    Static(String),
    /// Short-lived tokens from the metadata server.
    Metadata(MetadataTokenProvider),
}

impl Credentials {
    /// The bearer token for the next request, if any.
    pub async fn bearer_token(&self) -> Result<Option<String>, StoreError> {
        match self {
            Self::Anonymous => Ok(None),
            Self::Static(token) => Ok(Some(token.clone())),
            Self::Metadata(provider) => provider.token().await.map(Some),
        }
    }

    /// Forget a cached token the store just refused.
    pub async fn invalidate(&self) {
        if let Self::Metadata(provider) = self {
            provider.invalidate().await;
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Lifetime in seconds
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    refresh_at: Instant,
}

impl CachedToken {
    fn new(response: TokenResponse, fetched_at: Instant) -> Self {
        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(REFRESH_MARGIN);
        Self {
            token: response.access_token,
            refresh_at: fetched_at + lifetime,
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        now < self.refresh_at
    }
}

/// Fetches and caches access tokens from the metadata server.
pub struct MetadataTokenProvider {
    client: Client,
    token_url: String,
    cached: RwLock<Option<CachedToken>>,
}

impl MetadataTokenProvider {
    /// `host` is the metadata server, usually `metadata.google.internal`.
    pub fn new(client: Client, host: &str) -> Self {
        let root = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", host.trim_end_matches('/'))
        };

        Self {
            client,
            token_url: format!("{}{}", root, TOKEN_PATH),
            cached: RwLock::new(None),
        }
    }

    /// A valid access token, fetching a new one when the cached one is due.
    pub async fn token(&self) -> Result<String, StoreError> {
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Instant::now())) {
                return Ok(token.token.clone());
            }
        }

        let mut cached = self.cached.write().await;

        // Another task may have refreshed while we waited for the lock
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Instant::now())) {
            return Ok(token.token.clone());
        }

        let fetched_at = Instant::now();
        let response = self
            .client
            .get(&self.token_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let response: TokenResponse = response.json().await?;
        info!(expires_in = response.expires_in, "firestore_token_refreshed");

        let token = CachedToken::new(response, fetched_at);
        let value = token.token.clone();
        *cached = Some(token);

        Ok(value)
    }

    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }
}

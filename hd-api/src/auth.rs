//! Auth collaborators and token storage.
//!
//! The HTTP client does not know how tokens are minted or how sessions end;
//! both concerns are injected as trait objects so the auth flow has no
//! hidden dependency back into application state. All token mutations go
//! through `TokenStore`, the single accessor over durable storage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use hd_core::constants::storage_keys;
use hd_core::error::{HdError, HdResult};
use hd_core::storage::KeyValueStore;

use crate::response::ApiResponse;

/// Exchanges an expired token for a fresh one.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Refresh the given token, returning the replacement.
    async fn refresh(&self, token: &str) -> HdResult<String>;
}

/// Session collaborator notified on unrecoverable auth failure.
#[async_trait]
pub trait SessionController: Send + Sync {
    /// Terminate the session (clear user state, prompt re-authentication).
    async fn logout(&self);
}

/// Accessor for the stored auth token.
///
/// The token is the one piece of state mutated from multiple call sites
/// (request attachment, 401 handling, explicit login/logout); every
/// mutation funnels through here.
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Read the current token. Empty strings count as absent.
    pub async fn get(&self) -> HdResult<Option<String>> {
        Ok(self
            .store
            .get(storage_keys::AUTH_TOKEN)
            .await?
            .filter(|t| !t.trim().is_empty()))
    }

    /// Replace the stored token.
    pub async fn set(&self, token: &str) -> HdResult<()> {
        self.store.set(storage_keys::AUTH_TOKEN, token).await
    }

    /// Remove the stored token.
    pub async fn clear(&self) -> HdResult<()> {
        self.store.remove(storage_keys::AUTH_TOKEN).await
    }
}

/// Token refresher backed by the backend's refresh endpoint.
///
/// Uses its own bare HTTP call rather than `ApiClient` so the refresh
/// request can never recurse into another refresh.
pub struct HttpTokenRefresher {
    client: reqwest::Client,
    refresh_url: String,
}

impl HttpTokenRefresher {
    /// Create a refresher posting to `{base_url}/api/v1/auth/refresh`.
    pub fn new(base_url: &str, timeout: Duration) -> HdResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HdError::Internal(format!("failed to build refresh client: {e}")))?;
        Ok(Self {
            client,
            refresh_url: format!("{}/api/v1/auth/refresh", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, token: &str) -> HdResult<String> {
        debug!("refreshing auth token");
        let response = self
            .client
            .post(&self.refresh_url)
            .json(&json!({ "token": token }))
            .send()
            .await
            .map_err(|e| HdError::Auth(format!("refresh request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(HdError::Auth(format!(
                "refresh rejected with status {}",
                response.status().as_u16()
            )));
        }

        let envelope: ApiResponse = response
            .json()
            .await
            .map_err(|e| HdError::Auth(format!("malformed refresh response: {e}")))?;

        envelope
            .into_data()
            .get("token")
            .and_then(|t| t.as_str())
            .map(String::from)
            .ok_or_else(|| HdError::Auth("refresh response missing token".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hd_core::storage::MemoryStore;

    #[tokio::test]
    async fn test_token_store_roundtrip() {
        let tokens = TokenStore::new(Arc::new(MemoryStore::new()));
        assert_eq!(tokens.get().await.unwrap(), None);

        tokens.set("tok-1").await.unwrap();
        assert_eq!(tokens.get().await.unwrap(), Some("tok-1".into()));

        tokens.clear().await.unwrap();
        assert_eq!(tokens.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_blank_token_counts_as_absent() {
        let tokens = TokenStore::new(Arc::new(MemoryStore::with_entries(&[(
            storage_keys::AUTH_TOKEN,
            "   ",
        )])));
        assert_eq!(tokens.get().await.unwrap(), None);
    }
}

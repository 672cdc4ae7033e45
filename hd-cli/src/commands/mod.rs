//! CLI command implementations.

pub mod listen;
pub mod request;
pub mod session;
pub mod status;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use hd_api::{ApiClient, HttpTokenRefresher, SessionController};
use hd_core::config::ConfigHandle;
use hd_core::error::HdResult;
use hd_core::storage::{KeyValueStore, SqliteStore};
use hd_telemetry::{Analytics, HttpTransmitter};

/// Session collaborator for the CLI: there is no UI to bounce back to, so
/// an unrecoverable auth failure just tells the user to sign in again.
pub struct CliSession;

#[async_trait::async_trait]
impl SessionController for CliSession {
    async fn logout(&self) {
        warn!("session is no longer valid");
        eprintln!("Your session has expired. Run `huddle login` to sign in again.");
    }
}

/// Open the durable key-value store from config.
pub async fn open_store(config: &ConfigHandle) -> HdResult<Arc<dyn KeyValueStore>> {
    let path = config.read().await.effective_storage_path()?;
    Ok(Arc::new(SqliteStore::open(&path)?))
}

/// Build an API client wired with the store-backed token refresher.
pub async fn create_api_client(config: &ConfigHandle) -> HdResult<ApiClient> {
    let store = open_store(config).await?;
    let cfg = config.read().await;
    let refresher = Arc::new(HttpTokenRefresher::new(
        &cfg.server.address,
        Duration::from_millis(cfg.server.api_timeout_ms),
    )?);
    ApiClient::new(&cfg, store, refresher, Arc::new(CliSession))
}

/// Build the analytics queue over the durable store, recovering any events
/// persisted by a previous run.
pub async fn create_analytics(config: &ConfigHandle) -> HdResult<Analytics> {
    let store = open_store(config).await?;
    let cfg = config.read().await;
    let transmitter = Arc::new(HttpTransmitter::new(&cfg.server.address));
    let analytics = Analytics::new(cfg.telemetry.clone(), store, transmitter);
    drop(cfg);
    analytics.load_persisted().await;
    Ok(analytics)
}

/// Parse an optional JSON argument, defaulting to an empty object.
pub fn parse_json_arg(raw: Option<&str>) -> HdResult<serde_json::Value> {
    match raw {
        Some(raw) => Ok(serde_json::from_str(raw)?),
        None => Ok(serde_json::json!({})),
    }
}

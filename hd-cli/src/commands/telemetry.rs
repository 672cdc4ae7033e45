//! Telemetry commands - queue, flush, and consent.

use hd_core::config::ConfigHandle;
use hd_core::constants::storage_keys;
use hd_core::error::{HdError, HdResult};

pub async fn track(config: ConfigHandle, event_type: &str, data: Option<&str>) -> HdResult<()> {
    let analytics = super::create_analytics(&config).await?;
    let data = super::parse_json_arg(data)?;
    analytics.track(event_type, data).await;
    println!("Queued ({} pending).", analytics.queue_len().await);
    Ok(())
}

pub async fn flush(config: ConfigHandle) -> HdResult<()> {
    let analytics = super::create_analytics(&config).await?;
    let before = analytics.queue_len().await;
    if before == 0 {
        println!("Nothing to flush.");
        return Ok(());
    }
    analytics.flush().await;
    let after = analytics.queue_len().await;
    println!("Flushed {} event(s), {} remaining.", before - after, after);
    Ok(())
}

pub async fn consent(config: ConfigHandle, state: &str) -> HdResult<()> {
    let store = super::open_store(&config).await?;
    match state {
        "on" => {
            store.set(storage_keys::ANALYTICS_CONSENT, "true").await?;
            println!("Analytics consent granted.");
        }
        "off" => {
            store.set(storage_keys::ANALYTICS_CONSENT, "false").await?;
            println!("Analytics consent revoked.");
        }
        other => {
            return Err(HdError::Config(format!(
                "expected \"on\" or \"off\", got \"{other}\""
            )))
        }
    }
    Ok(())
}

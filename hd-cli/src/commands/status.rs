//! Status command - server reachability, session, and telemetry queue.

use hd_api::TokenStore;
use hd_core::config::ConfigHandle;
use hd_core::error::HdResult;

use crate::OutputFormat;

pub async fn run(config: ConfigHandle, format: OutputFormat) -> HdResult<()> {
    let address = config.read().await.server.address.clone();

    let api = super::create_api_client(&config).await?;
    let start = std::time::Instant::now();
    let reachable = api.health_check().await;
    let latency_ms = start.elapsed().as_millis();

    let store = super::open_store(&config).await?;
    let has_token = TokenStore::new(store).get().await?.is_some();

    let analytics = super::create_analytics(&config).await?;
    let queued = analytics.queue_len().await;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "server_address": address,
                    "server_reachable": reachable,
                    "latency_ms": latency_ms,
                    "signed_in": has_token,
                    "telemetry_queued": queued,
                })
            );
        }
        OutputFormat::Text => {
            println!("Server:    {address}");
            if reachable {
                println!("Reachable: yes ({latency_ms}ms)");
            } else {
                println!("Reachable: no");
            }
            println!("Session:   {}", if has_token { "signed in" } else { "signed out" });
            println!("Telemetry: {queued} event(s) queued");
        }
    }
    Ok(())
}

//! Listen/emit commands - drive the realtime connection from the terminal.
//!
//! TODO: swap the loopback transport for the Socket.IO wire transport once
//! it lands; until then these commands exercise the connection lifecycle
//! in-process.

use std::sync::Arc;

use tracing::info;

use hd_core::config::ConfigHandle;
use hd_core::constants::socket_events;
use hd_core::error::HdResult;
use hd_socket::{EmitOutcome, LoopbackTransport, RealtimeTransport, SocketManager};

async fn create_manager(config: &ConfigHandle) -> HdResult<Arc<SocketManager>> {
    let store = super::open_store(config).await?;
    let socket_config = config.read().await.socket.clone();
    let transport = Arc::new(LoopbackTransport::new());
    Ok(Arc::new(SocketManager::new(socket_config, store, move || {
        transport.clone() as Arc<dyn RealtimeTransport>
    })))
}

/// Connect, subscribe, and print incoming events until interrupted.
pub async fn run(config: ConfigHandle, events: Vec<String>, duration: u64) -> HdResult<()> {
    let manager = create_manager(&config).await?;

    let events = if events.is_empty() {
        vec![
            socket_events::ROOM_UPDATED.to_string(),
            socket_events::MATCH_FOUND.to_string(),
            socket_events::VOTE_EXTENSION.to_string(),
        ]
    } else {
        events
    };

    manager.connect().await?;
    let mut rx = manager.dispatcher().subscribe();
    for event in &events {
        let _ = manager.on(event).await;
        info!("listening for {event}");
    }
    println!("Connected. Listening for: {}", events.join(", "));

    let deadline = if duration > 0 {
        Some(tokio::time::Instant::now() + std::time::Duration::from_secs(duration))
    } else {
        None
    };

    loop {
        let next = rx.recv();
        let event = if let Some(deadline) = deadline {
            tokio::select! {
                event = next => event,
                _ = tokio::time::sleep_until(deadline) => break,
                _ = tokio::signal::ctrl_c() => break,
            }
        } else {
            tokio::select! {
                event = next => event,
                _ = tokio::signal::ctrl_c() => break,
            }
        };
        match event {
            Ok(event) => println!("[{}] {}", event.name, event.data),
            Err(_) => break,
        }
    }

    manager.disconnect().await;
    println!("Disconnected.");
    Ok(())
}

/// Emit a realtime event, reporting whether it went out or degraded.
pub async fn emit(config: ConfigHandle, event: &str, data: Option<&str>) -> HdResult<()> {
    let manager = create_manager(&config).await?;
    manager.connect().await?;

    let payload = super::parse_json_arg(data)?;
    match manager.emit_or_degrade(event, &payload).await {
        EmitOutcome::Sent => println!("Sent {event}."),
        EmitOutcome::Degraded => println!("Not sent: realtime connection unavailable."),
    }

    manager.disconnect().await;
    Ok(())
}

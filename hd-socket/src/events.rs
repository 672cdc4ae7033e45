//! Connection state, socket events, the broadcast dispatcher, and the
//! deferred listener registry.

use std::collections::HashSet;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// Connection state for the socket manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to connect.
    Disconnected,
    /// Attempting to establish a connection.
    Connecting,
    /// Connected and receiving events.
    Connected,
    /// Connection lost, reconnection scheduled.
    Reconnecting,
    /// Reconnection abandoned after exhausting attempts.
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A named realtime event with its JSON payload.
#[derive(Debug, Clone)]
pub struct SocketEvent {
    /// Server event name (e.g. "room-updated", "match-found").
    pub name: String,
    /// Event payload.
    pub data: Value,
}

/// Broadcast-based event dispatcher for decoupled event handling.
///
/// Multiple consumers can independently receive events without blocking one
/// another. Slow consumers that fall behind receive a Lagged error and may
/// miss events.
#[derive(Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<SocketEvent>,
}

impl EventDispatcher {
    /// Create a new dispatcher with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to receive socket events.
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.sender.subscribe()
    }

    /// Dispatch an event to all active subscribers.
    pub fn dispatch(&self, event: SocketEvent) {
        let name = event.name.clone();
        match self.sender.send(event) {
            Ok(count) => debug!("dispatched {name} to {count} subscriber(s)"),
            // No active receivers -- fine during startup/shutdown
            Err(_) => debug!("no subscribers for event {name}"),
        }
    }

    /// Current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Two-state registry of server event subscriptions.
///
/// A registration made while disconnected is queued as pending and flushed
/// atomically when the connection comes up, so it is never lost to
/// ordering. When the transport is torn down, attached subscriptions move
/// back to pending for the next connection.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    pending: Vec<String>,
    attached: HashSet<String>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a subscription for the next connection. Duplicates are ignored.
    pub fn add_pending(&mut self, event: &str) {
        if !self.attached.contains(event) && !self.pending.iter().any(|e| e == event) {
            self.pending.push(event.to_string());
        }
    }

    /// Drain the pending list for attachment, in registration order.
    pub fn take_pending(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending)
    }

    /// Record that a subscription is live on the current transport.
    pub fn mark_attached(&mut self, event: &str) {
        self.attached.insert(event.to_string());
    }

    /// Whether a subscription is live.
    pub fn is_attached(&self, event: &str) -> bool {
        self.attached.contains(event)
    }

    /// Number of queued registrations.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// The transport died: every attached subscription must re-attach on
    /// the next connection.
    pub fn reset(&mut self) {
        let attached = std::mem::take(&mut self.attached);
        for event in attached {
            if !self.pending.iter().any(|e| *e == event) {
                self.pending.push(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }

    #[tokio::test]
    async fn test_event_dispatcher() {
        let dispatcher = EventDispatcher::new(16);
        let mut rx = dispatcher.subscribe();

        dispatcher.dispatch(SocketEvent {
            name: "room-updated".into(),
            data: json!({"roomId": "r-1"}),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "room-updated");
        assert_eq!(event.data["roomId"], "r-1");
    }

    #[test]
    fn test_dispatch_without_subscribers_is_fine() {
        let dispatcher = EventDispatcher::new(4);
        dispatcher.dispatch(SocketEvent { name: "match-found".into(), data: json!({}) });
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[test]
    fn test_registry_pending_to_attached() {
        let mut registry = ListenerRegistry::new();
        registry.add_pending("room-updated");
        registry.add_pending("match-found");
        registry.add_pending("room-updated"); // duplicate ignored
        assert_eq!(registry.pending_count(), 2);

        let pending = registry.take_pending();
        assert_eq!(pending, vec!["room-updated".to_string(), "match-found".to_string()]);
        for event in &pending {
            registry.mark_attached(event);
        }
        assert!(registry.is_attached("room-updated"));
        assert_eq!(registry.pending_count(), 0);

        // Attached events are not re-queued
        registry.add_pending("room-updated");
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_registry_reset_requeues_attached() {
        let mut registry = ListenerRegistry::new();
        registry.add_pending("room-updated");
        for event in registry.take_pending() {
            registry.mark_attached(&event);
        }

        registry.reset();
        assert!(!registry.is_attached("room-updated"));
        assert_eq!(registry.pending_count(), 1);
    }
}

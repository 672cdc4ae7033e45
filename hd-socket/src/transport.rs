//! Realtime transport abstraction.
//!
//! The actual wire protocol (Socket.IO in production) lives behind the
//! `RealtimeTransport` trait; the manager only sees connect/disconnect/
//! emit/subscribe plus a broadcast stream of incoming events. A fresh
//! transport is created per connection attempt via an injected factory, so
//! there is never more than one live transport object.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use hd_core::error::{HdError, HdResult};

/// Lifecycle event names delivered through `incoming()` alongside business
/// events.
pub mod lifecycle {
    /// Connect acknowledgment from the server.
    pub const CONNECT: &str = "connect";
    /// Handshake failure; payload is the error string.
    pub const CONNECT_ERROR: &str = "connect_error";
    /// Connection dropped; payload is the reason string.
    pub const DISCONNECT: &str = "disconnect";
}

/// A raw event from the transport: lifecycle or named business event.
#[derive(Debug, Clone)]
pub struct TransportEvent {
    pub name: String,
    pub data: Value,
}

impl TransportEvent {
    /// Build a lifecycle event with a string payload.
    pub fn lifecycle(name: &str, detail: &str) -> Self {
        Self {
            name: name.to_string(),
            data: Value::String(detail.to_string()),
        }
    }
}

/// Why the transport disconnected, parsed from the reason string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed the connection ("io server disconnect").
    ServerInitiated,
    /// The client asked for the close ("io client disconnect").
    ClientInitiated,
    /// The underlying transport dropped ("transport close").
    TransportClose,
    /// The underlying transport errored ("transport error").
    TransportError,
    /// Keepalive pings stopped being answered ("ping timeout").
    PingTimeout,
    /// Anything else.
    Other,
}

impl DisconnectReason {
    pub fn parse(reason: &str) -> Self {
        match reason {
            "io server disconnect" => Self::ServerInitiated,
            "io client disconnect" => Self::ClientInitiated,
            "transport close" => Self::TransportClose,
            "transport error" => Self::TransportError,
            "ping timeout" => Self::PingTimeout,
            _ => Self::Other,
        }
    }

    /// Whether this disconnect is a recoverable condition that should
    /// trigger automatic reconnection. A deliberate client-initiated
    /// disconnect must not reconnect.
    pub fn should_reconnect(&self) -> bool {
        matches!(
            self,
            Self::ServerInitiated | Self::TransportClose | Self::TransportError | Self::PingTimeout
        )
    }
}

/// The realtime wire behind the connection manager.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Initiate the connection with the given auth token.
    ///
    /// May return before the server acknowledges; the manager resolves the
    /// attempt via the `connect` lifecycle event or by polling
    /// `is_connected`.
    async fn connect(&self, token: &str) -> HdResult<()>;

    /// Close the connection and release resources.
    async fn disconnect(&self);

    /// Send a named event. Requires a live connection.
    async fn emit(&self, event: &str, payload: &Value) -> HdResult<()>;

    /// Register interest in a named server event.
    async fn subscribe(&self, event: &str) -> HdResult<()>;

    /// Whether the wire currently reports itself connected.
    fn is_connected(&self) -> bool;

    /// Stream of lifecycle and business events.
    fn incoming(&self) -> broadcast::Receiver<TransportEvent>;
}

/// In-process transport used by tests and the CLI stub wiring.
///
/// Connects after an optional delay, records emitted events, and echoes
/// every emit back through the incoming stream. Failure modes are
/// scriptable: reject the handshake outright, or accept it but never
/// report connected (exercises the timeout watchdog).
pub struct LoopbackTransport {
    connected: AtomicBool,
    /// When set, `connect` fails immediately with this message.
    fail_connect: Mutex<Option<String>>,
    /// When true, `connect` returns Ok but the wire never comes up.
    stall: AtomicBool,
    /// Whether to emit a `connect` lifecycle ack.
    ack_on_connect: AtomicBool,
    connect_delay: Mutex<Duration>,
    tx: broadcast::Sender<TransportEvent>,
    emitted: Mutex<Vec<(String, Value)>>,
    subscriptions: Mutex<Vec<String>>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            connected: AtomicBool::new(false),
            fail_connect: Mutex::new(None),
            stall: AtomicBool::new(false),
            ack_on_connect: AtomicBool::new(true),
            connect_delay: Mutex::new(Duration::ZERO),
            tx,
            emitted: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next connect attempts to fail with the given message.
    pub async fn fail_connect_with(&self, message: &str) {
        *self.fail_connect.lock().await = Some(message.to_string());
    }

    /// Let subsequent connect attempts succeed again.
    pub async fn clear_connect_failure(&self) {
        *self.fail_connect.lock().await = None;
    }

    /// Accept the handshake but never report connected.
    pub fn stall_connect(&self) {
        self.stall.store(true, Ordering::SeqCst);
    }

    /// Suppress the `connect` ack so only polling can resolve the attempt.
    pub fn suppress_ack(&self) {
        self.ack_on_connect.store(false, Ordering::SeqCst);
    }

    /// Delay the handshake by the given duration.
    pub async fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().await = delay;
    }

    /// Events emitted through this transport.
    pub async fn emitted(&self) -> Vec<(String, Value)> {
        self.emitted.lock().await.clone()
    }

    /// Events subscribed on this transport.
    pub async fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }

    /// Inject a named server event into the incoming stream.
    pub fn inject_event(&self, name: &str, data: Value) {
        let _ = self.tx.send(TransportEvent { name: name.to_string(), data });
    }

    /// Simulate the wire dropping with the given reason.
    pub fn inject_disconnect(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self
            .tx
            .send(TransportEvent::lifecycle(lifecycle::DISCONNECT, reason));
    }
}

#[async_trait]
impl RealtimeTransport for LoopbackTransport {
    async fn connect(&self, _token: &str) -> HdResult<()> {
        if let Some(message) = self.fail_connect.lock().await.clone() {
            let _ = self
                .tx
                .send(TransportEvent::lifecycle(lifecycle::CONNECT_ERROR, &message));
            return Err(HdError::Socket(message));
        }

        let delay = *self.connect_delay.lock().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.stall.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.connected.store(true, Ordering::SeqCst);
        if self.ack_on_connect.load(Ordering::SeqCst) {
            let _ = self.tx.send(TransportEvent::lifecycle(lifecycle::CONNECT, ""));
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn emit(&self, event: &str, payload: &Value) -> HdResult<()> {
        if !self.is_connected() {
            return Err(HdError::Socket(format!("emit {event} on dead transport")));
        }
        self.emitted.lock().await.push((event.to_string(), payload.clone()));
        // Loopback: echo the event so listeners have something to receive
        let _ = self.tx.send(TransportEvent {
            name: event.to_string(),
            data: payload.clone(),
        });
        Ok(())
    }

    async fn subscribe(&self, event: &str) -> HdResult<()> {
        self.subscriptions.lock().await.push(event.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn incoming(&self) -> broadcast::Receiver<TransportEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_disconnect_reason_parsing() {
        assert_eq!(
            DisconnectReason::parse("io server disconnect"),
            DisconnectReason::ServerInitiated
        );
        assert_eq!(
            DisconnectReason::parse("io client disconnect"),
            DisconnectReason::ClientInitiated
        );
        assert_eq!(DisconnectReason::parse("transport close"), DisconnectReason::TransportClose);
        assert_eq!(DisconnectReason::parse("???"), DisconnectReason::Other);
    }

    #[test]
    fn test_reconnect_policy_per_reason() {
        assert!(DisconnectReason::ServerInitiated.should_reconnect());
        assert!(DisconnectReason::TransportError.should_reconnect());
        assert!(DisconnectReason::PingTimeout.should_reconnect());
        assert!(!DisconnectReason::ClientInitiated.should_reconnect());
        assert!(!DisconnectReason::Other.should_reconnect());
    }

    #[tokio::test]
    async fn test_loopback_connect_and_emit() {
        let transport = LoopbackTransport::new();
        let mut rx = transport.incoming();

        transport.connect("tok").await.unwrap();
        assert!(transport.is_connected());
        assert_eq!(rx.recv().await.unwrap().name, lifecycle::CONNECT);

        transport.emit("join-room", &json!({"roomId": "r-1"})).await.unwrap();
        let echoed = rx.recv().await.unwrap();
        assert_eq!(echoed.name, "join-room");
        assert_eq!(transport.emitted().await.len(), 1);
    }

    #[tokio::test]
    async fn test_loopback_emit_requires_connection() {
        let transport = LoopbackTransport::new();
        let err = transport.emit("join-room", &json!({})).await.unwrap_err();
        assert!(matches!(err, HdError::Socket(_)));
    }

    #[tokio::test]
    async fn test_loopback_scripted_failure() {
        let transport = LoopbackTransport::new();
        transport.fail_connect_with("auth rejected").await;
        let err = transport.connect("tok").await.unwrap_err();
        assert!(matches!(err, HdError::Socket(_)));
        assert!(!transport.is_connected());
    }
}

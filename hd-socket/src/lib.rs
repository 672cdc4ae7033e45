//! Huddle Socket - realtime connection manager.
//!
//! This crate owns the single logical realtime connection to the backend:
//! - Connection state machine (disconnected/connecting/connected/reconnecting)
//! - Token-gated connect with timeout detection and ack/poll resolution
//! - Automatic reconnection with capped exponential backoff and a single
//!   timer handle
//! - Two-state listener registry so registrations survive connect ordering
//! - Best-effort emit that degrades gracefully when the HTTP path already
//!   carried the action
//! - Event dispatching via tokio broadcast channels

pub mod events;
pub mod manager;
pub mod transport;

// Re-export key types
pub use events::{ConnectionState, EventDispatcher, ListenerRegistry, SocketEvent};
pub use manager::{EmitOutcome, SocketManager};
pub use transport::{DisconnectReason, LoopbackTransport, RealtimeTransport, TransportEvent};

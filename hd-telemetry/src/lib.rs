//! Huddle Telemetry - offline-durable analytics event queue.
//!
//! Events are validated at every boundary, batched in memory, mirrored to
//! durable storage after each mutation, and shipped to the backend in
//! sub-batches. Corrupt storage is detected and discarded rather than
//! repaired, and a persisted consent flag can turn the whole pipeline off.

pub mod event;
pub mod funnel;
pub mod queue;
pub mod transmit;

// Re-export key types
pub use event::{AnalyticsEvent, EventMetadata};
pub use funnel::{FunnelStep, FunnelSummary, FunnelTracker};
pub use queue::Analytics;
pub use transmit::{EventTransmitter, HttpTransmitter, MemoryTransmitter};

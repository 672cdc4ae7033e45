//! Huddle Core - Foundation types for the client transport layer.
//!
//! This crate provides the shared foundation used by all other Huddle crates:
//! - Application configuration (server URL, retry, socket, telemetry)
//! - Global error types covering all error categories
//! - Structured logging with tracing
//! - Durable key-value storage (SQLite-backed, plus an in-memory test store)
//! - Crash-sink and telemetry-hook collaborator traits
//! - Common constants

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod observe;
pub mod storage;

// Re-export commonly used items at the crate root
pub use config::{AppConfig, ConfigHandle};
pub use error::{HdError, HdResult};
pub use logging::init_logging;
pub use observe::{Breadcrumb, CrashSink, NoopSink, Severity, TelemetryHook};
pub use storage::{KeyValueStore, MemoryStore, SqliteStore};

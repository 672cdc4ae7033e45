//! Crash-sink and telemetry-hook collaborator traits.
//!
//! The crash reporter and the analytics pipeline are injected into the
//! transport components as trait objects. Both are fire-and-forget:
//! implementations swallow their own failures so diagnostics can never
//! break the primary request or connection flow.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::HdError;

/// Report severity for the crash sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// A lightweight diagnostic trail entry attached to future error reports.
#[derive(Debug, Clone)]
pub struct Breadcrumb {
    /// Grouping category (e.g. "http", "socket").
    pub category: String,
    /// Short human-readable message.
    pub message: String,
    /// Optional structured payload.
    pub data: Option<Value>,
    /// When the breadcrumb was recorded.
    pub timestamp: DateTime<Utc>,
}

impl Breadcrumb {
    /// Create a breadcrumb stamped with the current time.
    pub fn new(category: &str, message: impl Into<String>) -> Self {
        Self {
            category: category.to_string(),
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a structured payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Crash-reporting collaborator.
///
/// Maps onto whatever crash SDK the host application registers. All methods
/// are synchronous and must never panic or propagate errors.
pub trait CrashSink: Send + Sync {
    /// Report an error with context and severity.
    fn capture_exception(&self, error: &HdError, context: &str, severity: Severity);

    /// Report a standalone message.
    fn capture_message(&self, message: &str, severity: Severity);

    /// Record a breadcrumb for future reports.
    fn add_breadcrumb(&self, crumb: Breadcrumb);

    /// Associate subsequent reports with a user id.
    fn set_user(&self, user_id: &str);

    /// Clear the user association.
    fn clear_user(&self);
}

/// Analytics collaborator seam.
///
/// Lets the HTTP client and socket manager feed the telemetry pipeline
/// without depending on it (the pipeline itself implements this trait).
pub trait TelemetryHook: Send + Sync {
    /// Record an analytics event. Must not block or fail.
    fn track(&self, event_type: &str, data: Value);
}

/// Sink that discards everything. Default collaborator for tests and
/// hosts without a crash reporter.
pub struct NoopSink;

impl CrashSink for NoopSink {
    fn capture_exception(&self, _error: &HdError, _context: &str, _severity: Severity) {}
    fn capture_message(&self, _message: &str, _severity: Severity) {}
    fn add_breadcrumb(&self, _crumb: Breadcrumb) {}
    fn set_user(&self, _user_id: &str) {}
    fn clear_user(&self) {}
}

impl TelemetryHook for NoopSink {
    fn track(&self, _event_type: &str, _data: Value) {}
}

/// Capturing sink for tests: records everything it receives.
#[derive(Default)]
pub struct MemorySink {
    /// Captured (context, error string, severity) triples.
    pub exceptions: Mutex<Vec<(String, String, Severity)>>,
    /// Captured messages.
    pub messages: Mutex<Vec<(String, Severity)>>,
    /// Captured breadcrumbs.
    pub breadcrumbs: Mutex<Vec<Breadcrumb>>,
    /// Captured tracked events.
    pub events: Mutex<Vec<(String, Value)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of captured exceptions.
    pub fn exception_count(&self) -> usize {
        self.exceptions.lock().unwrap().len()
    }

    /// Number of captured tracked events.
    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

impl CrashSink for MemorySink {
    fn capture_exception(&self, error: &HdError, context: &str, severity: Severity) {
        self.exceptions
            .lock()
            .unwrap()
            .push((context.to_string(), error.to_string(), severity));
    }

    fn capture_message(&self, message: &str, severity: Severity) {
        self.messages.lock().unwrap().push((message.to_string(), severity));
    }

    fn add_breadcrumb(&self, crumb: Breadcrumb) {
        self.breadcrumbs.lock().unwrap().push(crumb);
    }

    fn set_user(&self, _user_id: &str) {}
    fn clear_user(&self) {}
}

impl TelemetryHook for MemorySink {
    fn track(&self, event_type: &str, data: Value) {
        self.events.lock().unwrap().push((event_type.to_string(), data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
        assert_eq!(Severity::Warning.to_string(), "warning");
    }

    #[test]
    fn test_memory_sink_captures() {
        let sink = MemorySink::new();
        sink.capture_exception(
            &HdError::Network("down".into()),
            "http",
            Severity::Warning,
        );
        sink.add_breadcrumb(
            Breadcrumb::new("http", "GET /rooms").with_data(serde_json::json!({"status": 200})),
        );
        sink.track("api_request_success", serde_json::json!({"path": "/rooms"}));

        assert_eq!(sink.exception_count(), 1);
        assert_eq!(sink.breadcrumbs.lock().unwrap().len(), 1);
        assert_eq!(sink.event_count(), 1);
    }
}

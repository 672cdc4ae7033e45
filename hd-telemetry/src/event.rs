//! Analytics event model and the validation gate.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-event metadata stamped at creation time.
///
/// Every field defaults so a partially written storage entry still
/// deserializes; the validation gate decides whether it survives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// RFC 3339 creation timestamp.
    #[serde(default)]
    pub timestamp: String,
    /// Session the event belongs to.
    #[serde(default)]
    pub session_id: String,
}

/// A single analytics event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub event_data: Value,
    #[serde(default)]
    pub metadata: EventMetadata,
}

impl AnalyticsEvent {
    pub fn new(event_type: &str, event_data: Value, session_id: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            event_data,
            metadata: EventMetadata {
                timestamp: Utc::now().to_rfc3339(),
                session_id: session_id.to_string(),
            },
        }
    }

    /// The validation gate: an event is valid iff its type is a non-empty
    /// string after trimming. Applied at enqueue, at load from storage,
    /// and immediately before flush.
    pub fn is_valid(&self) -> bool {
        !self.event_type.trim().is_empty()
    }

    /// Lenient decode of a stored entry. Entries that do not even
    /// deserialize are treated like invalid events by the caller.
    pub fn from_value(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }
}

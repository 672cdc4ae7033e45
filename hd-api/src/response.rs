//! Server response envelope.
//!
//! All backend REST responses follow a common envelope:
//! `{ "success": bool, "data": ..., "error": "..." }`. The `error` field is
//! sometimes sent as `message` by older backend builds, so both are read.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fallback message when the server gives no usable error text.
pub const GENERIC_ERROR_MESSAGE: &str = "The server returned an error.";

/// Standard backend response envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Whether the request succeeded.
    #[serde(default)]
    pub success: bool,
    /// Response payload (shape varies by endpoint).
    #[serde(default)]
    pub data: Option<Value>,
    /// Error text on failure responses.
    #[serde(default)]
    pub error: Option<String>,
    /// Legacy error field used by some endpoints.
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiResponse {
    /// Extract the best available error message, falling back to a generic one.
    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string())
    }

    /// Take the payload, substituting `null` when absent.
    pub fn into_data(self) -> Value {
        self.data.unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope() {
        let json = r#"{"success":true,"data":{"roomId":"r-1"}}"#;
        let resp: ApiResponse = serde_json::from_str(json).unwrap();
        assert!(resp.success);
        assert_eq!(resp.into_data()["roomId"], "r-1");
    }

    #[test]
    fn test_error_field_priority() {
        let json = r#"{"success":false,"error":"room is full","message":"ignored"}"#;
        let resp: ApiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.error_message(), "room is full");
    }

    #[test]
    fn test_message_fallback() {
        let json = r#"{"success":false,"message":"not found"}"#;
        let resp: ApiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.error_message(), "not found");
    }

    #[test]
    fn test_generic_fallback() {
        let json = r#"{"success":false}"#;
        let resp: ApiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.error_message(), GENERIC_ERROR_MESSAGE);

        let blank: ApiResponse = serde_json::from_str(r#"{"success":false,"error":"  "}"#).unwrap();
        assert_eq!(blank.error_message(), GENERIC_ERROR_MESSAGE);
    }

    #[test]
    fn test_missing_data_is_null() {
        let resp: ApiResponse = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert!(resp.into_data().is_null());
    }
}

//! Structured responses returned by system event handlers
//!
//! A mod that consumes a system event may answer the submitter with a
//! structured response; the send endpoint surfaces it as `response_data`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response produced by a system event handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventResponse {
    /// Whether the operation succeeded
    pub success: bool,
    /// Human-readable outcome or error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Structured result data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl EventResponse {
    /// Successful response without data
    pub fn ok() -> Self {
        EventResponse {
            success: true,
            message: None,
            data: None,
        }
    }

    /// Successful response with data
    pub fn ok_with_data(data: Value) -> Self {
        EventResponse {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    /// Failed response with a message
    pub fn error(message: impl Into<String>) -> Self {
        EventResponse {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Set the message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_shapes() {
        let resp = EventResponse::ok_with_data(json!({"text": "hello"}));
        assert!(resp.success);
        assert_eq!(resp.data.unwrap()["text"], "hello");

        let resp = EventResponse::error("forbidden");
        assert!(!resp.success);
        assert_eq!(resp.message.as_deref(), Some("forbidden"));
    }
}

//! Wire envelope shared by server and client.
//!
//! Every frame on the connection is a single JSON [`Message`]. The `type`
//! field decides which payload slot is meaningful:
//!
//! | `type` | `method` | payload |
//! |--------|----------|---------|
//! | `request` | required | `params` (optional) |
//! | `notification` | required | `params` (optional) |
//! | `response` | - | `result` |
//! | `error` | - | `error` |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{McpError, McpResult};

/// Kind of envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Call expecting exactly one `response` or `error` with the same id
    Request,
    /// Successful reply to a request
    Response,
    /// One-way message, no reply expected
    Notification,
    /// Failed reply to a request (or an uncorrelated parse error)
    Error,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Notification => "notification",
            Self::Error => "error",
        })
    }
}

/// Error payload carried by `error` messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric error code
    pub code: i32,
    /// Human-readable message
    pub message: String,
    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A single protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Correlation id
    pub id: String,
    /// Envelope kind
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Operation name for requests and notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Request or notification parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Response payload (`null` is kept as `Some(Value::Null)`)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub result: Option<Value>,
    /// Error payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    /// Creation time (informational)
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Generate a fresh message id
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Message {
    fn with_kind(id: String, kind: MessageType) -> Self {
        Self {
            id,
            kind,
            method: None,
            params: None,
            result: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a request with a fresh id
    pub fn request(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: Some(method.into()),
            params,
            ..Self::with_kind(new_id(), MessageType::Request)
        }
    }

    /// Create a notification with a fresh id
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: Some(method.into()),
            params,
            ..Self::with_kind(new_id(), MessageType::Notification)
        }
    }

    /// Create a successful response to the request `id`
    pub fn response(id: impl Into<String>, result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::with_kind(id.into(), MessageType::Response)
        }
    }

    /// Create an error reply to the request `id`
    pub fn error(id: impl Into<String>, error: ErrorObject) -> Self {
        Self {
            error: Some(error),
            ..Self::with_kind(id.into(), MessageType::Error)
        }
    }

    /// Create an error reply from an [`McpError`]
    pub fn from_mcp_error(id: impl Into<String>, error: &McpError) -> Self {
        Self::error(id, error.to_error_object())
    }

    /// Method name, or an empty string when absent
    pub fn method_name(&self) -> &str {
        self.method.as_deref().unwrap_or_default()
    }

    /// Whether this is a notification for `method`
    pub fn is_notification_for(&self, method: &str) -> bool {
        self.kind == MessageType::Notification && self.method.as_deref() == Some(method)
    }

    /// Check the structural rules for the envelope kind
    ///
    /// # Errors
    ///
    /// Returns a [`crate::ErrorKind::ParseError`] describing the first violated rule.
    pub fn validate(&self) -> McpResult<()> {
        if self.id.is_empty() {
            return Err(McpError::parse_error("Message id must not be empty"));
        }

        let populated = [
            self.params.is_some(),
            self.result.is_some(),
            self.error.is_some(),
        ]
        .into_iter()
        .filter(|p| *p)
        .count();
        if populated > 1 {
            return Err(McpError::parse_error(
                "At most one of params, result and error may be set",
            ));
        }

        match self.kind {
            MessageType::Request | MessageType::Notification => {
                if self.method.as_deref().is_none_or(str::is_empty) {
                    return Err(McpError::parse_error(format!(
                        "{} is missing a method",
                        self.kind
                    )));
                }
                if self.result.is_some() || self.error.is_some() {
                    return Err(McpError::parse_error(format!(
                        "{} may only carry params",
                        self.kind
                    )));
                }
            }
            MessageType::Response => {
                if self.result.is_none() {
                    return Err(McpError::parse_error("response is missing a result"));
                }
            }
            MessageType::Error => {
                if self.error.is_none() {
                    return Err(McpError::parse_error("error is missing an error object"));
                }
            }
        }
        Ok(())
    }

    /// Parse and validate a text frame
    ///
    /// # Errors
    ///
    /// Returns a [`crate::ErrorKind::ParseError`] when the frame is not valid
    /// JSON, does not match the envelope shape, or fails [`Message::validate`].
    pub fn parse(raw: &str) -> McpResult<Self> {
        let message: Self = serde_json::from_str(raw)
            .map_err(|e| McpError::parse_error(format!("Parse error: {e}")))?;
        message.validate()?;
        Ok(message)
    }

    /// Serialize to a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns an error if a payload value cannot be serialized.
    pub fn to_json(&self) -> McpResult<String> {
        serde_json::to_string(self)
            .map_err(|e| McpError::internal(format!("Failed to serialize message: {e}")))
    }

    /// Turn a reply into the caller-facing outcome
    ///
    /// # Errors
    ///
    /// Returns the decoded peer error for `error` messages, and an internal
    /// error if the message is not a reply at all.
    pub fn into_result(self) -> McpResult<Value> {
        match self.kind {
            MessageType::Response => Ok(self.result.unwrap_or(Value::Null)),
            MessageType::Error => Err(self.error.as_ref().map_or_else(
                || McpError::internal("Error reply without error object"),
                McpError::from_error_object,
            )),
            other => Err(McpError::internal(format!(
                "Expected a reply, received {other}"
            ))),
        }
    }
}

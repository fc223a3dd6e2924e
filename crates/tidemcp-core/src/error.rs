//! Unified error handling for tidemcp.
//!
//! A single [`McpError`] type is used by every crate in the workspace. Each
//! error carries an [`ErrorKind`] which decides the numeric code used on the
//! wire and lets callers branch on the failure category.
//!
//! ## Wire mapping
//!
//! | Kind | Code |
//! |------|------|
//! | `ParseError` | -32700 |
//! | `MethodNotFound` | -32601 |
//! | `InvalidParams` | -32602 |
//! | `AuthenticationRequired` | -32001 |
//! | everything else | -32603 |
//!
//! Because many kinds share `-32603`, the server also places the kind name in
//! the error `data` so the client can restore it.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::message::ErrorObject;

/// Result type alias for tidemcp operations
pub type McpResult<T> = std::result::Result<T, McpError>;

/// JSON-RPC parse error code.
pub const PARSE_ERROR: i32 = -32700;
/// JSON-RPC method not found code.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// JSON-RPC invalid params code.
pub const INVALID_PARAMS: i32 = -32602;
/// JSON-RPC internal error code.
pub const INTERNAL_ERROR: i32 = -32603;
/// Authentication required before calling this method.
pub const AUTHENTICATION_REQUIRED: i32 = -32001;

/// Error classification for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Frame could not be parsed as a message (-32700)
    ParseError,
    /// Session must authenticate first (-32001)
    AuthenticationRequired,
    /// Supplied token or credentials were rejected
    AuthenticationFailed,
    /// No handler registered for the method (-32601)
    MethodNotFound,
    /// Session lacks the permission the method needs
    PermissionDenied,
    /// Tool is not registered (or not cached on the client)
    ToolNotFound,
    /// Parameters failed validation (-32602)
    InvalidParams,
    /// No response arrived within the request timeout
    RequestTimeout,
    /// Handler failed, panicked or exceeded the server-side timeout (-32603)
    Internal,
    /// Connection closed or not established
    ConnectionClosed,
    /// Socket-level failure
    Transport,
    /// Invalid configuration
    Configuration,
}

impl ErrorKind {
    /// Code used when an error of this kind is put on the wire.
    pub const fn jsonrpc_code(self) -> i32 {
        match self {
            Self::ParseError => PARSE_ERROR,
            Self::MethodNotFound => METHOD_NOT_FOUND,
            Self::InvalidParams => INVALID_PARAMS,
            Self::AuthenticationRequired => AUTHENTICATION_REQUIRED,
            _ => INTERNAL_ERROR,
        }
    }

    /// Best-effort classification of a bare wire code.
    pub const fn from_code(code: i32) -> Self {
        match code {
            PARSE_ERROR => Self::ParseError,
            METHOD_NOT_FOUND => Self::MethodNotFound,
            INVALID_PARAMS => Self::InvalidParams,
            AUTHENTICATION_REQUIRED => Self::AuthenticationRequired,
            _ => Self::Internal,
        }
    }

    /// Stable snake_case name, identical to the serde representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "parse_error",
            Self::AuthenticationRequired => "authentication_required",
            Self::AuthenticationFailed => "authentication_failed",
            Self::MethodNotFound => "method_not_found",
            Self::PermissionDenied => "permission_denied",
            Self::ToolNotFound => "tool_not_found",
            Self::InvalidParams => "invalid_params",
            Self::RequestTimeout => "request_timeout",
            Self::Internal => "internal",
            Self::ConnectionClosed => "connection_closed",
            Self::Transport => "transport",
            Self::Configuration => "configuration",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified tidemcp error type
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct McpError {
    /// Error classification
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
    /// Optional structured details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl McpError {
    /// Create a new error with kind and message
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured details
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Create a parse error
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, message)
    }

    /// Create an authentication required error
    #[must_use]
    pub fn authentication_required() -> Self {
        Self::new(ErrorKind::AuthenticationRequired, "Authentication required")
    }

    /// Create an authentication failed error
    #[must_use]
    pub fn authentication_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::AuthenticationFailed,
            format!("Authentication failed: {}", reason.into()),
        )
    }

    /// Create a method not found error
    #[must_use]
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::MethodNotFound,
            format!("Method not found: {}", method.into()),
        )
    }

    /// Create a permission denied error for a missing permission
    #[must_use]
    pub fn permission_denied(permission: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::PermissionDenied,
            format!("Permission denied: requires '{}'", permission.into()),
        )
    }

    /// Create a tool not found error
    #[must_use]
    pub fn tool_not_found(tool_name: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::ToolNotFound,
            format!("Tool not found: {}", tool_name.into()),
        )
    }

    /// Create a validation/invalid params error
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    /// Create a request timeout error for `method`
    #[must_use]
    pub fn request_timeout(method: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::RequestTimeout,
            format!("Request timeout: {}", method.into()),
        )
    }

    /// Create an internal error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Create a connection closed error
    #[must_use]
    pub fn connection_closed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionClosed, message)
    }

    /// Create a transport error
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Wire code for this error
    pub const fn jsonrpc_code(&self) -> i32 {
        self.kind.jsonrpc_code()
    }

    /// Whether retrying the same call could succeed
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::RequestTimeout | ErrorKind::ConnectionClosed | ErrorKind::Transport
        )
    }

    /// Convert into the wire representation.
    ///
    /// The kind travels in `data.kind`; caller-supplied data is nested under
    /// `data.details`.
    pub fn to_error_object(&self) -> ErrorObject {
        let mut data = json!({ "kind": self.kind });
        if let Some(details) = &self.data {
            data["details"] = details.clone();
        }
        ErrorObject {
            code: self.jsonrpc_code(),
            message: self.message.clone(),
            data: Some(data),
        }
    }

    /// Rebuild an error received from the peer.
    pub fn from_error_object(error: &ErrorObject) -> Self {
        let kind = error
            .data
            .as_ref()
            .and_then(|d| d.get("kind"))
            .and_then(|k| serde_json::from_value::<ErrorKind>(k.clone()).ok())
            .unwrap_or_else(|| ErrorKind::from_code(error.code));
        let details = error
            .data
            .as_ref()
            .and_then(|d| d.get("details"))
            .cloned();
        Self {
            kind,
            message: error.message.clone(),
            data: details,
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_params(format!("Invalid JSON payload: {err}"))
    }
}

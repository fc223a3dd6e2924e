//! Payload types exchanged by the built-in methods.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tool description as advertised by `listTools`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Unique tool name
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// JSON schema the tool input must satisfy
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
    /// JSON schema describing the tool output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl Tool {
    /// Create a tool accepting any object input
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: empty_object_schema(),
            output_schema: None,
        }
    }

    /// Set the input schema
    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Set the output schema
    #[must_use]
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// Reference to an external resource attached to a context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource location
    pub uri: String,
    /// Resource kind (free-form, e.g. `file`)
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Per-session context record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRecord {
    /// Context id
    pub id: String,
    /// Context name
    pub name: String,
    /// Free-form metadata, merged key by key on update
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Attached resources, replaced wholesale on update
    #[serde(default)]
    pub resources: Vec<ResourceRef>,
    /// Capabilities advertised by the server
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl ContextRecord {
    /// Fresh record named `default` with the server's capability list
    pub fn new(capabilities: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: "default".to_string(),
            metadata: Map::new(),
            resources: Vec::new(),
            capabilities,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a patch: metadata keys are merged, resources are replaced if given
    pub fn apply(&mut self, patch: ContextPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(metadata) = patch.metadata {
            self.metadata.extend(metadata);
        }
        if let Some(resources) = patch.resources {
            self.resources = resources;
        }
        self.updated_at = Utc::now();
    }
}

/// Parameters of `updateContext`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextPatch {
    /// New context name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Metadata keys to merge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Replacement resource list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<ResourceRef>>,
}

impl ContextPatch {
    /// Patch that sets a single metadata key
    pub fn metadata(key: impl Into<String>, value: Value) -> Self {
        let mut metadata = Map::new();
        metadata.insert(key.into(), value);
        Self {
            metadata: Some(metadata),
            ..Self::default()
        }
    }

    /// Patch that replaces the resource list
    pub fn resources(resources: Vec<ResourceRef>) -> Self {
        Self {
            resources: Some(resources),
            ..Self::default()
        }
    }
}

/// Parameters of the server's `welcome` notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeParams {
    /// Id of the session created for this connection
    pub session_id: String,
    /// Client id (from `x-client-id` or generated)
    pub client_id: String,
    /// Protocol version spoken by the server
    pub protocol_version: String,
    /// Server capability list
    pub capabilities: Vec<String>,
    /// Whether requests other than `authenticate` are refused until login
    pub auth_required: bool,
    /// Server name
    #[serde(default)]
    pub server_name: String,
    /// Server version
    #[serde(default)]
    pub server_version: String,
}

/// Username/password pair
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

impl Credentials {
    /// Create a credential pair
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Parameters of `authenticate`
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateParams {
    /// Bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Username/password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

impl fmt::Debug for AuthenticateParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticateParams")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// Result of a successful `authenticate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateResult {
    /// Always `true` on success
    pub authenticated: bool,
    /// Session that was authenticated
    pub session_id: String,
    /// Permissions granted to the session
    pub permissions: Vec<String>,
}

/// One row of `listSessions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session id
    pub id: String,
    /// Client id
    pub client_id: String,
    /// Authentication state
    pub authenticated: bool,
    /// Granted permissions
    pub permissions: HashSet<String>,
    /// When the session was created
    pub connected_at: DateTime<Utc>,
    /// Last inbound traffic
    pub last_activity: DateTime<Utc>,
}

/// Parameters of `executeTool`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteToolParams {
    /// Tool name
    pub name: String,
    /// Tool input
    #[serde(default)]
    pub input: Value,
}

/// Result of `listTools`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListToolsResult {
    /// Registered tools
    pub tools: Vec<Tool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_context_patch_merges_metadata_and_replaces_resources() {
        let mut ctx = ContextRecord::new(vec!["tools".into(), "context".into()]);
        ctx.apply(ContextPatch::metadata("a", json!(1)));
        ctx.apply(ContextPatch::metadata("b", json!("two")));
        assert_eq!(ctx.metadata.get("a"), Some(&json!(1)));
        assert_eq!(ctx.metadata.get("b"), Some(&json!("two")));

        let first = ResourceRef {
            uri: "file:///a".into(),
            kind: "file".into(),
            name: None,
        };
        let second = ResourceRef {
            uri: "file:///b".into(),
            kind: "file".into(),
            name: Some("b".into()),
        };
        ctx.apply(ContextPatch::resources(vec![first]));
        ctx.apply(ContextPatch::resources(vec![second.clone()]));
        assert_eq!(ctx.resources, vec![second]);

        // metadata-only patch leaves resources untouched
        ctx.apply(ContextPatch::metadata("c", json!(null)));
        assert_eq!(ctx.resources.len(), 1);
        assert_eq!(ctx.name, "default");
    }

    #[test]
    fn test_context_wire_shape() {
        let ctx = ContextRecord::new(vec!["tools".into()]);
        let value = serde_json::to_value(&ctx).unwrap();
        assert!(value.get("createdAt").is_some());
        assert!(value.get("updatedAt").is_some());
        assert_eq!(value["capabilities"], json!(["tools"]));
    }

    #[test]
    fn test_authenticate_params_shapes() {
        let token: AuthenticateParams = serde_json::from_value(json!({"token": "t"})).unwrap();
        assert_eq!(token.token.as_deref(), Some("t"));
        assert!(token.credentials.is_none());

        let creds: AuthenticateParams = serde_json::from_value(
            json!({"credentials": {"username": "admin", "password": "admin"}}),
        )
        .unwrap();
        assert_eq!(creds.credentials, Some(Credentials::new("admin", "admin")));
    }

    #[test]
    fn test_secrets_are_redacted_in_debug() {
        let params = AuthenticateParams {
            token: Some("secret-token".into()),
            credentials: Some(Credentials::new("admin", "hunter2")),
        };
        let debug = format!("{params:?}");
        assert!(!debug.contains("secret-token"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("admin"));
    }

    #[test]
    fn test_tool_defaults() {
        let tool: Tool = serde_json::from_value(json!({"name": "echo"})).unwrap();
        assert_eq!(tool.input_schema, json!({"type": "object"}));
        assert_eq!(tool.description, "");

        let value = serde_json::to_value(Tool::new("echo", "Echo input")).unwrap();
        assert!(value.get("inputSchema").is_some());
        assert!(value.get("outputSchema").is_none());
    }
}

//! Server configuration
//!
//! Configuration can be built in code (`ServerConfig::default()` plus the
//! `with_*` methods) or loaded from a TOML, YAML or JSON file where
//! `TIDEMCP_SERVER__*` environment variables override file values.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tidemcp_core::{LoggingConfig, McpError, McpResult, permissions};

/// Environment prefix for overrides, e.g. `TIDEMCP_SERVER__MAX_CONNECTIONS=10`
pub const ENV_PREFIX: &str = "TIDEMCP_SERVER";

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name announced in `welcome`
    pub name: String,
    /// Server version announced in `welcome`
    pub version: String,
    /// Listen address (`host:port`, port 0 picks a free port)
    pub bind_address: String,
    /// WebSocket endpoint path
    pub path: String,
    /// Sessions beyond this count are refused with close code 1008
    pub max_connections: usize,
    /// Refuse every method but `authenticate` until the session logs in
    pub auth_required: bool,
    /// Ping interval; sessions idle for twice this long are reaped
    pub heartbeat_interval_ms: u64,
    /// Upper bound for a single handler invocation
    pub request_timeout_ms: u64,
    /// Static tokens and users
    pub auth: AuthConfig,
    /// Log output settings
    pub logging: LoggingConfig,
}

/// Static authentication material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accepted bearer tokens (granted the default permission set)
    pub tokens: Vec<String>,
    /// Accepted username/password pairs
    pub users: Vec<UserCredential>,
}

/// One static user
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredential {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
    /// Permissions granted on login
    #[serde(default = "permissions::default_set")]
    pub permissions: Vec<String>,
}

impl std::fmt::Debug for UserCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("permissions", &self.permissions)
            .finish()
    }
}

impl UserCredential {
    /// User with the default permission set
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            permissions: permissions::default_set(),
        }
    }

    /// Replace the granted permissions
    #[must_use]
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            users: vec![UserCredential::new("admin", "admin").with_permissions([
                permissions::READ,
                permissions::WRITE,
                permissions::EXECUTE,
                permissions::ADMIN,
            ])],
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: crate::SERVER_NAME.to_string(),
            version: crate::SERVER_VERSION.to_string(),
            bind_address: "127.0.0.1:8080".to_string(),
            path: "/".to_string(),
            max_connections: 100,
            auth_required: false,
            heartbeat_interval_ms: 30_000,
            request_timeout_ms: 30_000,
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a file (TOML, YAML, or JSON)
    ///
    /// The format is picked from the file extension. Environment variables
    /// prefixed with `TIDEMCP_SERVER__` override file settings.
    ///
    /// ```rust,no_run
    /// use tidemcp_server::ServerConfig;
    ///
    /// let config = ServerConfig::from_file("server.toml")?;
    /// # Ok::<(), tidemcp_core::McpError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file is missing, has an
    /// unsupported extension, cannot be parsed, or fails [`Self::validate`].
    pub fn from_file(path: impl AsRef<Path>) -> McpResult<Self> {
        let config: Self = tidemcp_core::config_file::load(path.as_ref(), ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid field.
    pub fn validate(&self) -> McpResult<()> {
        if self.bind_address.rsplit_once(':').is_none_or(|(host, _)| host.is_empty()) {
            return Err(McpError::configuration(format!(
                "bind_address must be host:port, got '{}'",
                self.bind_address
            )));
        }
        if !self.path.starts_with('/') {
            return Err(McpError::configuration("path must start with '/'"));
        }
        if self.max_connections == 0 {
            return Err(McpError::configuration("max_connections must be at least 1"));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(McpError::configuration("heartbeat_interval_ms must be positive"));
        }
        if self.request_timeout_ms == 0 {
            return Err(McpError::configuration("request_timeout_ms must be positive"));
        }
        Ok(())
    }

    /// Heartbeat interval as a [`Duration`]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Request timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Set the server name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the listen address
    #[must_use]
    pub fn with_bind_address(mut self, addr: impl Into<String>) -> Self {
        self.bind_address = addr.into();
        self
    }

    /// Set the WebSocket endpoint path
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the connection limit
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Require authentication before other methods
    #[must_use]
    pub fn with_auth_required(mut self, required: bool) -> Self {
        self.auth_required = required;
        self
    }

    /// Set the heartbeat interval
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the per-request handler timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Accept an additional bearer token
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth.tokens.push(token.into());
        self
    }

    /// Accept an additional user
    #[must_use]
    pub fn with_user(mut self, user: UserCredential) -> Self {
        self.auth.users.push(user);
        self
    }

    /// Set logging options
    #[must_use]
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }
}

//! Client configuration
//!
//! Built in code (`ClientConfig::default()` plus `with_*`) or loaded from a
//! TOML, YAML or JSON file with `TIDEMCP_CLIENT__*` environment overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tidemcp_core::{AuthenticateParams, Credentials, LoggingConfig, McpError, McpResult};

/// Environment prefix for overrides, e.g. `TIDEMCP_CLIENT__SERVER_URL=ws://host:9000`
pub const ENV_PREFIX: &str = "TIDEMCP_CLIENT";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server WebSocket URL (`ws://` or `wss://`)
    pub server_url: String,
    /// Sent as `x-client-id`; a UUID is generated when absent
    pub client_id: Option<String>,
    /// Default per-request timeout
    pub request_timeout_ms: u64,
    /// Upper bound for opening the socket and for receiving `welcome`
    pub connect_timeout_ms: u64,
    /// Interval between `heartbeat` notifications
    pub heartbeat_interval_ms: u64,
    /// Reconnect after abnormal closes
    pub auto_reconnect: bool,
    /// Delay before the first reconnect attempt
    pub reconnect_interval_ms: u64,
    /// Cap for the reconnect delay; required when `reconnect_backoff` > 1.0
    pub max_reconnect_interval_ms: Option<u64>,
    /// Delay multiplier per failed attempt; `1.0` keeps the interval fixed
    pub reconnect_backoff: f64,
    /// Sent when the server requires authentication
    pub authentication: Option<Authentication>,
    /// Log output settings
    pub logging: LoggingConfig,
}

/// Authentication material presented after `welcome`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authentication {
    /// Bearer token
    Token(String),
    /// Username and password
    Credentials {
        /// User name
        username: String,
        /// Password
        password: String,
    },
}

impl std::fmt::Debug for Authentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
            Self::Credentials { username, .. } => f
                .debug_struct("Credentials")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

impl Authentication {
    /// Parameters for the `authenticate` request
    pub fn to_params(&self) -> AuthenticateParams {
        match self {
            Self::Token(token) => AuthenticateParams {
                token: Some(token.clone()),
                credentials: None,
            },
            Self::Credentials { username, password } => AuthenticateParams {
                token: None,
                credentials: Some(Credentials::new(username.clone(), password.clone())),
            },
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8080".to_string(),
            client_id: None,
            request_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            heartbeat_interval_ms: 30_000,
            auto_reconnect: true,
            reconnect_interval_ms: 5_000,
            max_reconnect_interval_ms: None,
            reconnect_backoff: 1.0,
            authentication: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load from a file, apply `TIDEMCP_CLIENT__*` overrides, and validate
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file is missing, has an
    /// unsupported extension, does not parse, or fails [`Self::validate`].
    pub fn from_file(path: impl AsRef<Path>) -> McpResult<Self> {
        let config: Self = tidemcp_core::config_file::load(path.as_ref(), ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the client cannot work with
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first offending field.
    pub fn validate(&self) -> McpResult<()> {
        let url = url::Url::parse(&self.server_url).map_err(|e| {
            McpError::configuration(format!("Invalid server_url '{}': {e}", self.server_url))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(McpError::configuration(format!(
                "server_url must use ws:// or wss://, got '{}'",
                url.scheme()
            )));
        }
        for (field, value) in [
            ("request_timeout_ms", self.request_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("reconnect_interval_ms", self.reconnect_interval_ms),
        ] {
            if value == 0 {
                return Err(McpError::configuration(format!(
                    "{field} must be greater than 0"
                )));
            }
        }
        if !self.reconnect_backoff.is_finite() || self.reconnect_backoff < 1.0 {
            return Err(McpError::configuration(
                "reconnect_backoff must be a finite value >= 1.0",
            ));
        }
        match self.max_reconnect_interval_ms {
            Some(max) if max < self.reconnect_interval_ms => {
                return Err(McpError::configuration(
                    "max_reconnect_interval_ms must not be below reconnect_interval_ms",
                ));
            }
            None if self.reconnect_backoff > 1.0 => {
                return Err(McpError::configuration(
                    "reconnect_backoff > 1.0 requires max_reconnect_interval_ms",
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// Default request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Connection and handshake timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Heartbeat interval
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Set the server URL
    #[must_use]
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Set the client id
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the default request timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the connection and handshake timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the heartbeat interval
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Enable or disable automatic reconnect
    #[must_use]
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the reconnect interval
    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Grow the reconnect delay by `factor` per failed attempt, up to `max`
    #[must_use]
    pub fn with_reconnect_backoff(mut self, factor: f64, max: Duration) -> Self {
        self.reconnect_backoff = factor;
        self.max_reconnect_interval_ms = Some(max.as_millis() as u64);
        self
    }

    /// Authenticate with a token
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.authentication = Some(Authentication::Token(token.into()));
        self
    }

    /// Authenticate with username and password
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.authentication = Some(Authentication::Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Set the logging configuration
    #[must_use]
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tidemcp_core::ErrorKind;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.server_url, "ws://127.0.0.1:8080");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect_interval_ms, 5_000);
        assert!(config.authentication.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            ClientConfig::default().with_server_url("not a url"),
            ClientConfig::default().with_server_url("http://127.0.0.1:8080"),
            ClientConfig::default().with_request_timeout(Duration::ZERO),
            ClientConfig::default().with_heartbeat_interval(Duration::ZERO),
            ClientConfig {
                reconnect_backoff: 0.5,
                ..ClientConfig::default()
            },
            ClientConfig::default().with_reconnect_backoff(2.0, Duration::from_millis(10)),
            ClientConfig {
                reconnect_backoff: 2.0,
                max_reconnect_interval_ms: None,
                ..ClientConfig::default()
            },
        ];
        for config in cases {
            let err = config.validate().unwrap_err();
            assert_eq!(err.kind, ErrorKind::Configuration);
        }
    }

    #[test]
    fn test_backoff_without_cap_is_rejected() {
        let uncapped = ClientConfig {
            reconnect_backoff: 1.5,
            ..ClientConfig::default()
        };
        let err = uncapped.validate().unwrap_err();
        assert!(err.message.contains("max_reconnect_interval_ms"));
        assert!(crate::McpClient::new(uncapped).is_err());

        let fixed = ClientConfig {
            reconnect_backoff: 1.0,
            max_reconnect_interval_ms: None,
            ..ClientConfig::default()
        };
        assert!(fixed.validate().is_ok());
        assert!(
            ClientConfig::default()
                .with_reconnect_backoff(1.5, Duration::from_secs(60))
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_authentication_params() {
        let token = ClientConfig::default().with_token("t0k3n");
        let params = token.authentication.unwrap().to_params();
        assert_eq!(params.token.as_deref(), Some("t0k3n"));
        assert!(params.credentials.is_none());

        let creds = ClientConfig::default().with_credentials("admin", "secret");
        let auth = creds.authentication.unwrap();
        assert!(!format!("{auth:?}").contains("secret"));
        let params = auth.to_params();
        assert_eq!(params.credentials.unwrap().username, "admin");
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
server_url = "ws://10.0.0.5:9000/mcp"
client_id = "agent-7"
request_timeout_ms = 1500
auto_reconnect = false

[authentication.credentials]
username = "ops"
password = "hunter2"
"#
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server_url, "ws://10.0.0.5:9000/mcp");
        assert_eq!(config.client_id.as_deref(), Some("agent-7"));
        assert_eq!(config.request_timeout(), Duration::from_millis(1500));
        assert!(!config.auto_reconnect);
        assert_eq!(config.heartbeat_interval_ms, 30_000);
        assert_eq!(
            config.authentication,
            Some(Authentication::Credentials {
                username: "ops".into(),
                password: "hunter2".into(),
            })
        );
    }

    #[test]
    fn test_from_file_runs_validation() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(file, r#"{{"server_url": "ftp://example.com"}}"#).unwrap();
        let err = ClientConfig::from_file(file.path()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err.message.contains("ws://"));
    }
}

//! Authentication for the built-in `authenticate` method.

use async_trait::async_trait;
use tidemcp_core::{AuthenticateParams, McpError, McpResult, permissions};

use crate::config::{AuthConfig, UserCredential};

/// Decides whether `authenticate` parameters are acceptable
///
/// Implementations return the permissions to grant on success.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify a token or credentials
    ///
    /// # Errors
    ///
    /// Returns an `AuthenticationFailed` error when the material is rejected.
    async fn authenticate(&self, params: &AuthenticateParams) -> McpResult<Vec<String>>;
}

/// Authenticator backed by the static tokens and users in [`AuthConfig`]
#[derive(Debug, Clone)]
pub struct StaticAuthenticator {
    tokens: Vec<String>,
    users: Vec<UserCredential>,
}

impl StaticAuthenticator {
    /// Build from configuration
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            tokens: config.tokens.clone(),
            users: config.users.clone(),
        }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, params: &AuthenticateParams) -> McpResult<Vec<String>> {
        if let Some(token) = &params.token {
            return if self.tokens.iter().any(|t| t == token) {
                Ok(permissions::default_set())
            } else {
                Err(McpError::authentication_failed("invalid token"))
            };
        }

        if let Some(credentials) = &params.credentials {
            return self
                .users
                .iter()
                .find(|u| u.username == credentials.username && u.password == credentials.password)
                .map(|u| u.permissions.clone())
                .ok_or_else(|| McpError::authentication_failed("invalid credentials"));
        }

        Err(McpError::authentication_failed(
            "either a token or credentials are required",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemcp_core::{Credentials, ErrorKind};

    fn authenticator() -> StaticAuthenticator {
        let mut config = AuthConfig::default();
        config.tokens.push("valid-token".into());
        StaticAuthenticator::new(&config)
    }

    #[tokio::test]
    async fn test_token_grants_default_permissions() {
        let params = AuthenticateParams {
            token: Some("valid-token".into()),
            credentials: None,
        };
        let granted = authenticator().authenticate(&params).await.unwrap();
        assert_eq!(granted, permissions::default_set());
    }

    #[tokio::test]
    async fn test_admin_credentials_grant_admin() {
        let params = AuthenticateParams {
            token: None,
            credentials: Some(Credentials::new("admin", "admin")),
        };
        let granted = authenticator().authenticate(&params).await.unwrap();
        assert!(granted.iter().any(|p| p == permissions::READ));
        assert!(granted.iter().any(|p| p == permissions::WRITE));
        assert!(granted.iter().any(|p| p == permissions::ADMIN));
    }

    #[tokio::test]
    async fn test_rejections() {
        let auth = authenticator();
        for params in [
            AuthenticateParams {
                token: Some("wrong".into()),
                credentials: None,
            },
            AuthenticateParams {
                token: None,
                credentials: Some(Credentials::new("admin", "wrong")),
            },
            AuthenticateParams::default(),
        ] {
            let err = auth.authenticate(&params).await.unwrap_err();
            assert_eq!(err.kind, ErrorKind::AuthenticationFailed);
            assert!(err.message.starts_with("Authentication failed"));
        }
    }
}

//! Request handler table and the built-in protocol methods.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tidemcp_core::{
    AuthenticateParams, AuthenticateResult, ContextPatch, ExecuteToolParams, ListToolsResult,
    McpError, McpResult, methods, permissions,
};

use crate::auth::Authenticator;
use crate::registry::ToolRegistry;
use crate::session::{Session, SessionTable};

/// Boxed request handler: `(params, calling session) → result`
pub type RequestHandler =
    Arc<dyn Fn(Option<Value>, Arc<Session>) -> BoxFuture<'static, McpResult<Value>> + Send + Sync>;

/// Wrap an async closure as a [`RequestHandler`]
pub fn request_handler<F, Fut>(f: F) -> RequestHandler
where
    F: Fn(Option<Value>, Arc<Session>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = McpResult<Value>> + Send + 'static,
{
    Arc::new(move |params, session| Box::pin(f(params, session)))
}

/// Method name → handler
#[derive(Default)]
pub(crate) struct HandlerTable {
    handlers: RwLock<HashMap<String, RequestHandler>>,
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("methods", &self.handlers.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerTable {
    pub(crate) fn insert(&self, method: impl Into<String>, handler: RequestHandler) {
        self.handlers.write().insert(method.into(), handler);
    }

    pub(crate) fn get(&self, method: &str) -> Option<RequestHandler> {
        self.handlers.read().get(method).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.read().len()
    }
}

/// Decode params into `T`; absent params decode from `{}`
fn decode<T: DeserializeOwned>(params: Option<Value>) -> McpResult<T> {
    serde_json::from_value(params.unwrap_or_else(|| json!({})))
        .map_err(|e| McpError::invalid_params(format!("Invalid params: {e}")))
}

fn to_value<T: serde::Serialize>(value: &T) -> McpResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| McpError::internal(format!("Failed to serialize result: {e}")))
}

/// Register every built-in method
pub(crate) fn install_builtins(
    table: &HandlerTable,
    sessions: &Arc<SessionTable>,
    tools: &Arc<ToolRegistry>,
    authenticator: Arc<dyn Authenticator>,
) {
    table.insert(methods::AUTHENTICATE, authenticate(authenticator));

    let registry = Arc::clone(tools);
    table.insert(
        methods::LIST_TOOLS,
        request_handler(move |_, _| {
            let result = ListToolsResult {
                tools: registry.list(),
            };
            async move { to_value(&result) }
        }),
    );

    let registry = Arc::clone(tools);
    table.insert(
        methods::EXECUTE_TOOL,
        request_handler(move |params, session| {
            let registry = Arc::clone(&registry);
            async move {
                session.require(permissions::EXECUTE)?;
                let ExecuteToolParams { name, input } = decode(params)?;
                tracing::debug!(tool = %name, "Executing tool");
                registry.execute(&name, input).await
            }
        }),
    );

    table.insert(
        methods::GET_CONTEXT,
        request_handler(|_, session| async move { to_value(&session.context()) }),
    );

    table.insert(
        methods::UPDATE_CONTEXT,
        request_handler(|params, session| async move {
            let patch: ContextPatch = decode(params)?;
            to_value(&session.update_context(patch))
        }),
    );

    let table_sessions = Arc::clone(sessions);
    table.insert(
        methods::LIST_SESSIONS,
        request_handler(move |_, session| {
            let sessions = Arc::clone(&table_sessions);
            async move {
                session.require(permissions::ADMIN)?;
                let mut infos: Vec<_> = sessions.snapshot().iter().map(|s| s.info()).collect();
                infos.sort_by_key(|info| info.connected_at);
                Ok(json!({ "sessions": infos }))
            }
        }),
    );
}

/// Built-in `authenticate` handler using `authenticator`
pub(crate) fn authenticate(authenticator: Arc<dyn Authenticator>) -> RequestHandler {
    request_handler(move |params, session| {
        let authenticator = Arc::clone(&authenticator);
        async move {
            let params: AuthenticateParams = decode(params)?;
            let granted = authenticator.authenticate(&params).await?;
            session.authenticate(granted.iter().cloned());
            tracing::info!(
                session_id = %session.id(),
                permissions = ?granted,
                "Session authenticated"
            );
            to_value(&AuthenticateResult {
                authenticated: true,
                session_id: session.id().to_string(),
                permissions: granted,
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthenticator;
    use crate::config::AuthConfig;
    use crate::registry::tool_handler;
    use crate::session::tests::detached_session;
    use tidemcp_core::{ContextRecord, ErrorKind, Tool};

    struct Fixture {
        table: HandlerTable,
        sessions: Arc<SessionTable>,
        tools: Arc<ToolRegistry>,
    }

    fn fixture() -> Fixture {
        let table = HandlerTable::default();
        let sessions = Arc::new(SessionTable::default());
        let tools = Arc::new(ToolRegistry::default());
        install_builtins(
            &table,
            &sessions,
            &tools,
            Arc::new(StaticAuthenticator::new(&AuthConfig::default())),
        );
        Fixture {
            table,
            sessions,
            tools,
        }
    }

    async fn call(
        fixture: &Fixture,
        method: &str,
        params: Option<Value>,
        session: &Arc<Session>,
    ) -> McpResult<Value> {
        let handler = fixture.table.get(method).expect("builtin registered");
        handler(params, Arc::clone(session)).await
    }

    #[tokio::test]
    async fn test_all_builtins_registered() {
        let fixture = fixture();
        for method in [
            methods::AUTHENTICATE,
            methods::LIST_TOOLS,
            methods::EXECUTE_TOOL,
            methods::GET_CONTEXT,
            methods::UPDATE_CONTEXT,
            methods::LIST_SESSIONS,
        ] {
            assert!(fixture.table.get(method).is_some(), "{method} missing");
        }
        assert_eq!(fixture.table.len(), 6);
    }

    #[tokio::test]
    async fn test_authenticate_marks_session() {
        let fixture = fixture();
        let session = Arc::new(detached_session(true));

        let result = call(
            &fixture,
            methods::AUTHENTICATE,
            Some(json!({"credentials": {"username": "admin", "password": "admin"}})),
            &session,
        )
        .await
        .unwrap();
        let result: AuthenticateResult = serde_json::from_value(result).unwrap();
        assert!(result.authenticated);
        assert_eq!(result.session_id, session.id());
        assert!(session.is_authenticated());
        assert!(session.has_permission(permissions::ADMIN));
    }

    #[tokio::test]
    async fn test_authenticate_failure_leaves_session_untouched() {
        let fixture = fixture();
        let session = Arc::new(detached_session(true));
        let err = call(
            &fixture,
            methods::AUTHENTICATE,
            Some(json!({"credentials": {"username": "admin", "password": "nope"}})),
            &session,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthenticationFailed);
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_execute_tool_requires_permission() {
        let fixture = fixture();
        fixture
            .tools
            .register(
                Tool::new("echo", "echo"),
                tool_handler(|input| async move { Ok(json!({"echo": input["message"]})) }),
            )
            .unwrap();

        let locked = Arc::new(detached_session(true));
        let err = call(
            &fixture,
            methods::EXECUTE_TOOL,
            Some(json!({"name": "echo", "input": {"message": "hi"}})),
            &locked,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);

        let open = Arc::new(detached_session(false));
        let result = call(
            &fixture,
            methods::EXECUTE_TOOL,
            Some(json!({"name": "echo", "input": {"message": "hi"}})),
            &open,
        )
        .await
        .unwrap();
        assert_eq!(result, json!({"echo": "hi"}));

        let err = call(
            &fixture,
            methods::EXECUTE_TOOL,
            Some(json!({"name": "missing"})),
            &open,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ToolNotFound);

        let err = call(&fixture, methods::EXECUTE_TOOL, None, &open)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParams);
    }

    #[tokio::test]
    async fn test_context_round_trip() {
        let fixture = fixture();
        let session = Arc::new(detached_session(false));

        let updated = call(
            &fixture,
            methods::UPDATE_CONTEXT,
            Some(json!({"metadata": {"k": "v"}})),
            &session,
        )
        .await
        .unwrap();
        assert_eq!(updated["metadata"]["k"], "v");

        let ctx: ContextRecord =
            serde_json::from_value(call(&fixture, methods::GET_CONTEXT, None, &session).await.unwrap())
                .unwrap();
        assert_eq!(ctx.metadata.get("k"), Some(&json!("v")));
        assert_eq!(ctx.capabilities, vec!["tools", "context"]);
    }

    #[tokio::test]
    async fn test_list_sessions_requires_admin() {
        let fixture = fixture();
        let caller = fixture
            .sessions
            .admit(10, || detached_session(false))
            .unwrap();

        let err = call(&fixture, methods::LIST_SESSIONS, None, &caller)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);

        caller.authenticate(vec![permissions::ADMIN.to_string()]);
        let result = call(&fixture, methods::LIST_SESSIONS, None, &caller)
            .await
            .unwrap();
        assert_eq!(result["sessions"].as_array().unwrap().len(), 1);
        assert_eq!(result["sessions"][0]["id"], caller.id());
    }

    #[tokio::test]
    async fn test_list_tools_reflects_registry() {
        let fixture = fixture();
        let session = Arc::new(detached_session(false));
        fixture
            .tools
            .register(
                Tool::new("calculator", "adds"),
                tool_handler(|_| async { Ok(Value::Null) }),
            )
            .unwrap();

        let result: ListToolsResult =
            serde_json::from_value(call(&fixture, methods::LIST_TOOLS, None, &session).await.unwrap())
                .unwrap();
        assert_eq!(result.tools.len(), 1);
        assert_eq!(result.tools[0].name, "calculator");
    }
}

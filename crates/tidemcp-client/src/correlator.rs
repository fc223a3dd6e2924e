//! Request correlator: pending requests keyed by id.
//!
//! Removal from the map is the single point that decides a request's
//! outcome. Whoever removes the entry (the reader delivering a reply, the
//! timeout path, or a mass rejection on disconnect) settles it; everyone
//! else finds nothing and does nothing.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tidemcp_core::{McpError, McpResult};
use tokio::sync::oneshot;

#[derive(Debug)]
struct PendingRequest {
    method: String,
    sent_at: Instant,
    reply: oneshot::Sender<McpResult<Value>>,
}

/// Map from request id to the waiting caller
#[derive(Debug, Default)]
pub(crate) struct Correlator {
    pending: DashMap<String, PendingRequest>,
}

impl Correlator {
    /// Record a request about to be sent
    pub(crate) fn register(
        &self,
        id: impl Into<String>,
        method: impl Into<String>,
    ) -> oneshot::Receiver<McpResult<Value>> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id.into(),
            PendingRequest {
                method: method.into(),
                sent_at: Instant::now(),
                reply: tx,
            },
        );
        rx
    }

    /// Settle `id` with `outcome`; `false` if it was already settled
    pub(crate) fn complete(&self, id: &str, outcome: McpResult<Value>) -> bool {
        let Some((_, pending)) = self.pending.remove(id) else {
            tracing::debug!(request_id = %id, "Reply for unknown or settled request");
            return false;
        };
        tracing::trace!(
            request_id = %id,
            method = %pending.method,
            elapsed_ms = pending.sent_at.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "Request settled"
        );
        // The caller may have given up already.
        let _ = pending.reply.send(outcome);
        true
    }

    /// Forget `id` without settling it
    pub(crate) fn cancel(&self, id: &str) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Wait for `id` to settle, or time it out after `timeout`
    pub(crate) async fn wait(
        &self,
        id: &str,
        method: &str,
        mut rx: oneshot::Receiver<McpResult<Value>>,
        timeout: Duration,
    ) -> McpResult<Value> {
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::connection_closed("Request abandoned")),
            Err(_) => {
                if self.cancel(id) {
                    tracing::debug!(request_id = %id, method, "Request timed out");
                    Err(McpError::request_timeout(method))
                } else {
                    // Settled between the deadline and the removal attempt.
                    rx.await
                        .unwrap_or_else(|_| Err(McpError::connection_closed("Request abandoned")))
                }
            }
        }
    }

    /// Settle every pending request with `error`
    pub(crate) fn reject_all(&self, error: &McpError) -> usize {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter(|id| self.complete(id, Err(error.clone())))
            .count()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tidemcp_core::ErrorKind;

    #[tokio::test]
    async fn test_reply_resolves_waiter() {
        let correlator = Correlator::default();
        let rx = correlator.register("1", "listTools");
        assert!(correlator.complete("1", Ok(json!({"tools": []}))));

        let result = correlator
            .wait("1", "listTools", rx, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result, json!({"tools": []}));
        assert_eq!(correlator.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry_and_late_reply_is_ignored() {
        let correlator = Correlator::default();
        let rx = correlator.register("1", "executeTool");

        let err = correlator
            .wait("1", "executeTool", rx, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RequestTimeout);
        assert_eq!(err.message, "Request timeout: executeTool");
        assert_eq!(correlator.len(), 0);

        assert!(!correlator.complete("1", Ok(json!("late"))));
    }

    #[tokio::test]
    async fn test_reject_all_settles_everything_once() {
        let correlator = Arc::new(Correlator::default());
        let receivers: Vec<_> = (0..3)
            .map(|i| (i.to_string(), correlator.register(i.to_string(), "getContext")))
            .collect();

        let rejected = correlator.reject_all(&McpError::connection_closed("Connection closed"));
        assert_eq!(rejected, 3);
        assert_eq!(correlator.reject_all(&McpError::connection_closed("again")), 0);

        for (id, rx) in receivers {
            let err = correlator
                .wait(&id, "getContext", rx, Duration::from_secs(1))
                .await
                .unwrap_err();
            assert_eq!(err.kind, ErrorKind::ConnectionClosed);
        }
    }

    #[tokio::test]
    async fn test_concurrent_registrations() {
        let correlator = Arc::new(Correlator::default());
        let mut tasks = Vec::new();
        for i in 0..32 {
            let correlator = Arc::clone(&correlator);
            tasks.push(tokio::spawn(async move {
                let id = format!("req-{i}");
                let rx = correlator.register(id.clone(), "echo");
                let responder = Arc::clone(&correlator);
                let reply_id = id.clone();
                tokio::spawn(async move {
                    responder.complete(&reply_id, Ok(json!(i)));
                });
                correlator
                    .wait(&id, "echo", rx, Duration::from_secs(5))
                    .await
            }));
        }
        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap().unwrap(), json!(i));
        }
        assert_eq!(correlator.len(), 0);
    }
}

//! Liveness sweep: ping live sessions, reap silent ones.

use std::sync::Arc;
use std::time::Duration;

use tidemcp_core::close_codes;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::session::SessionTable;

/// Sweep every `interval` until `shutdown` fires
pub(crate) async fn run(sessions: Arc<SessionTable>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let reaped = sweep(&sessions, interval * 2);
                if reaped > 0 {
                    tracing::info!(reaped, "Reaped idle sessions");
                }
            }
        }
    }
    tracing::debug!("Heartbeat task stopped");
}

/// Close and remove sessions idle longer than `max_idle`, ping the rest.
///
/// Returns how many sessions were reaped.
pub(crate) fn sweep(sessions: &SessionTable, max_idle: Duration) -> usize {
    let mut reaped = 0;
    for session in sessions.snapshot() {
        if session.idle() > max_idle {
            tracing::warn!(
                session_id = %session.id(),
                idle_ms = session.idle().as_millis() as u64,
                "Session missed heartbeats, closing"
            );
            session.close(close_codes::GOING_AWAY, "heartbeat timeout");
            sessions.remove(session.id());
            reaped += 1;
        } else if let Err(e) = session.ping() {
            tracing::debug!(session_id = %session.id(), error = %e, "Ping failed");
        }
    }
    reaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, initial_permissions};
    use tidemcp_transport::{ChannelHandle, Outbound};

    #[test]
    fn test_sweep_reaps_idle_and_pings_live() {
        let table = SessionTable::default();
        let (idle_handle, mut idle_rx) = ChannelHandle::detached();
        let (live_handle, mut live_rx) = ChannelHandle::detached();

        let idle = table
            .admit(10, || {
                Session::new("idle".into(), None, idle_handle, initial_permissions(false), vec![])
            })
            .unwrap();
        let live = table
            .admit(10, || {
                Session::new("live".into(), None, live_handle, initial_permissions(false), vec![])
            })
            .unwrap();
        idle.set_last_activity(chrono::Utc::now() - chrono::Duration::seconds(60));

        assert_eq!(sweep(&table, Duration::from_secs(10)), 1);
        assert!(table.get(idle.id()).is_none());
        assert!(table.get(live.id()).is_some());

        assert_eq!(
            idle_rx.try_recv().unwrap(),
            Outbound::Close {
                code: close_codes::GOING_AWAY,
                reason: "heartbeat timeout".into()
            }
        );
        assert_eq!(live_rx.try_recv().unwrap(), Outbound::Ping);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let table = Arc::new(SessionTable::default());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(Arc::clone(&table), Duration::from_millis(100), shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(350)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("heartbeat task did not stop")
            .unwrap();
    }
}

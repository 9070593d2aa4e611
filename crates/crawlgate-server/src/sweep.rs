//! Idle-connection sweep.
//!
//! The per-session read timeout already bounds connection lifetime;
//! this ticking scan is hardening on top of it, catching sessions
//! whose inbound loop is wedged between iterations. Termination is
//! cooperative: the sweep raises each stale session's signal and the
//! session tears itself down at its next iteration boundary.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::websocket::registry::ConnectionRegistry;

/// Scan the registry every `interval`, terminating sessions with no
/// inbound activity for `idle_window`. Runs until cancelled.
pub async fn run_idle_sweep(
    registry: Arc<ConnectionRegistry>,
    idle_window: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // Consume the immediate first tick.
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let stale = registry.idle_sessions(idle_window).await;
                for session in stale {
                    info!(client_id = %session.id, "terminating idle session");
                    session.terminate();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::session::ClientSession;
    use crawlgate_core::ids::ClientId;
    use tokio::sync::mpsc;

    fn make_session(id: &str) -> Arc<ClientSession> {
        let (tx, _rx) = mpsc::channel(4);
        Arc::new(ClientSession::new(
            ClientId::from_raw(id),
            tx,
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn terminates_only_stale_sessions() {
        let registry = Arc::new(ConnectionRegistry::new());
        let fresh = make_session("fresh");
        let stale = make_session("stale");
        stale.force_idle_for_test(Duration::from_secs(3600));
        registry.insert(Arc::clone(&fresh)).await;
        registry.insert(Arc::clone(&stale)).await;

        let cancel = CancellationToken::new();
        let sweep = tokio::spawn(run_idle_sweep(
            Arc::clone(&registry),
            Duration::from_secs(600),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        sweep.await.unwrap();

        assert!(stale.is_terminated());
        assert!(!fresh.is_terminated());
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let registry = Arc::new(ConnectionRegistry::new());
        let cancel = CancellationToken::new();
        let sweep = tokio::spawn(run_idle_sweep(
            registry,
            Duration::from_secs(600),
            Duration::from_secs(60),
            cancel.clone(),
        ));
        cancel.cancel();
        sweep.await.unwrap();
    }
}

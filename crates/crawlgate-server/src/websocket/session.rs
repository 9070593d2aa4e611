//! Client session lifecycle — one accepted WebSocket from upgrade
//! through teardown.
//!
//! Each session runs two tasks: an inbound loop that reads job
//! submissions (bounded by the idle timeout) and publishes them to
//! the broker, and a single writer task that drains the session's
//! bounded mailbox onto the socket. The writer task is the only
//! producer on the sink, so outbound frames are never interleaved and
//! results for one client arrive in the order they were enqueued.
//!
//! Inbound decode policy is strict: a malformed submission terminates
//! the session rather than being skipped. Broker publish failures are
//! logged and survived; the client may resubmit.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use crawlgate_broker::{Broker, JOBS_TOPIC};
use crawlgate_core::errors::GatewayError;
use crawlgate_core::ids::ClientId;
use crawlgate_core::messages::Job;
use futures::{SinkExt, Stream, StreamExt};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::registry::ConnectionRegistry;
use crate::config::GatewayConfig;
use crate::metrics as names;

/// Gateway-side state for one live client connection.
pub struct ClientSession {
    /// Identifier assigned at accept; the routing key for results.
    pub id: ClientId,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    last_activity: Mutex<Instant>,
    dropped_results: AtomicU64,
}

impl ClientSession {
    /// Create session state around an outbound mailbox sender and a
    /// termination signal.
    pub fn new(id: ClientId, tx: mpsc::Sender<String>, cancel: CancellationToken) -> Self {
        Self {
            id,
            tx,
            cancel,
            last_activity: Mutex::new(Instant::now()),
            dropped_results: AtomicU64::new(0),
        }
    }

    /// Enqueue a text frame onto the session mailbox.
    ///
    /// Returns `false` if the mailbox is full or the session is gone;
    /// a full mailbox increments the drop counter.
    pub fn enqueue(&self, message: String) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_results.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Raise the termination signal; the inbound loop observes it at
    /// its next iteration boundary.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }

    /// Whether termination has been requested.
    pub fn is_terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record inbound activity now.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last inbound message (or accept).
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Results dropped because the mailbox was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_results.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn force_idle_for_test(&self, idle: Duration) {
        if let Some(past) = Instant::now().checked_sub(idle) {
            *self.last_activity.lock() = past;
        }
    }
}

/// Why the inbound loop exited. Logged on teardown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExitReason {
    /// Termination signal raised (sweep or shutdown).
    Terminated,
    /// No inbound message within the idle window.
    IdleTimeout,
    /// Peer closed or the transport failed.
    Transport,
    /// Malformed job submission (strict policy).
    Decode,
}

impl ExitReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Terminated => "terminated",
            Self::IdleTimeout => "idle_timeout",
            Self::Transport => "transport",
            Self::Decode => "decode",
        }
    }
}

/// Run one client session to completion.
///
/// 1. Assigns a fresh client id and registers the session
/// 2. Announces the id in a `connection.established` frame
/// 3. Spawns the writer task (mailbox → socket)
/// 4. Runs the inbound loop until a fatal condition
/// 5. Deregisters on every exit path
#[instrument(skip_all, fields(client_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    registry: Arc<ConnectionRegistry>,
    broker: Arc<dyn Broker>,
    config: Arc<GatewayConfig>,
) {
    let client_id = ClientId::new();
    let _ = tracing::Span::current().record("client_id", client_id.as_str());

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<String>(config.mailbox_capacity);
    let cancel = CancellationToken::new();
    let session = Arc::new(ClientSession::new(
        client_id.clone(),
        send_tx,
        cancel.clone(),
    ));

    registry.insert(Arc::clone(&session)).await;
    info!("client connected");
    counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(names::WS_CONNECTIONS_ACTIVE).increment(1.0);

    // Tell the client which id its results will be routed under.
    let greeting = serde_json::json!({
        "type": "connection.established",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "data": { "clientId": client_id },
    });
    if let Ok(json) = serde_json::to_string(&greeting) {
        let _ = ws_tx.send(Message::Text(json.into())).await;
    }

    // Writer task: sole producer on the socket sink.
    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                () = writer_cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let reason = inbound_loop(
        &mut ws_rx,
        &session,
        broker.as_ref(),
        &cancel,
        config.idle_timeout(),
    )
    .await;

    // Teardown — runs for every exit reason.
    info!(reason = reason.as_str(), "client disconnected");
    counter!(names::WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    gauge!(names::WS_CONNECTIONS_ACTIVE).decrement(1.0);
    if session.drop_count() > 0 {
        warn!(dropped = session.drop_count(), "session dropped results on a full mailbox");
    }
    cancel.cancel();
    let _ = registry.remove(&client_id).await;
    writer.abort();
}

/// Read job submissions until the session dies.
async fn inbound_loop(
    ws_rx: &mut (impl Stream<Item = Result<Message, axum::Error>> + Unpin),
    session: &ClientSession,
    broker: &dyn Broker,
    cancel: &CancellationToken,
    idle_timeout: Duration,
) -> ExitReason {
    loop {
        let read = tokio::select! {
            () = cancel.cancelled() => return ExitReason::Terminated,
            read = tokio::time::timeout(idle_timeout, ws_rx.next()) => read,
        };

        let msg = match read {
            Err(_) => {
                warn!(error = %GatewayError::IdleTimeout, "closing idle connection");
                return ExitReason::IdleTimeout;
            }
            Ok(None) => return ExitReason::Transport,
            Ok(Some(Err(e))) => {
                let err = GatewayError::Transport(e.to_string());
                warn!(error = %err, kind = err.error_kind(), "read failed");
                return ExitReason::Transport;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        session.touch();

        let bytes = match msg {
            Message::Text(ref t) => t.as_bytes().to_vec(),
            Message::Binary(ref data) => data.to_vec(),
            Message::Close(_) => {
                debug!("client sent close frame");
                return ExitReason::Transport;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let mut job = match Job::decode(&bytes) {
            Ok(job) => job,
            Err(e) => {
                let err = GatewayError::Decode(e.to_string());
                warn!(error = %err, kind = err.error_kind(), "malformed job submission");
                counter!(names::JOBS_REJECTED_TOTAL).increment(1);
                return ExitReason::Decode;
            }
        };

        // Stamp the server-assigned id so the result can be routed
        // back even when the client omits clientId.
        if job.client_id.is_none() {
            job.client_id = Some(session.id.clone());
        }

        let payload = match job.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to re-encode job");
                continue;
            }
        };

        match broker.publish(JOBS_TOPIC, payload).await {
            Ok(()) => {
                debug!("job published");
                counter!(names::JOBS_PUBLISHED_TOTAL).increment(1);
            }
            Err(e) => {
                // Broker unavailability is not fatal to the session;
                // the client may retry by resubmitting.
                let err = GatewayError::Broker(e.to_string());
                warn!(error = %err, kind = err.error_kind(), "job not published");
                counter!(names::JOBS_PUBLISH_FAILURES_TOTAL).increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_session() -> (ClientSession, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(4);
        let session = ClientSession::new(
            ClientId::from_raw("c1"),
            tx,
            CancellationToken::new(),
        );
        (session, rx)
    }

    #[tokio::test]
    async fn enqueue_delivers_to_mailbox() {
        let (session, mut rx) = make_session();
        assert!(session.enqueue("hello".into()));
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn enqueue_preserves_order() {
        let (session, mut rx) = make_session();
        for i in 0..4 {
            assert!(session.enqueue(format!("m{i}")));
        }
        for i in 0..4 {
            assert_eq!(rx.recv().await.unwrap(), format!("m{i}"));
        }
    }

    #[tokio::test]
    async fn full_mailbox_drops_and_counts() {
        let (tx, _rx) = mpsc::channel(1);
        let session =
            ClientSession::new(ClientId::from_raw("c1"), tx, CancellationToken::new());
        assert!(session.enqueue("first".into()));
        assert!(!session.enqueue("second".into()));
        assert_eq!(session.drop_count(), 1);
    }

    #[tokio::test]
    async fn closed_mailbox_rejects_without_counting() {
        let (tx, rx) = mpsc::channel(1);
        let session =
            ClientSession::new(ClientId::from_raw("c1"), tx, CancellationToken::new());
        drop(rx);
        assert!(!session.enqueue("gone".into()));
        assert_eq!(session.drop_count(), 0);
    }

    #[test]
    fn terminate_is_observable_and_idempotent() {
        let (session, _rx) = make_session();
        assert!(!session.is_terminated());
        session.terminate();
        session.terminate();
        assert!(session.is_terminated());
    }

    #[test]
    fn touch_resets_idle_clock() {
        let (session, _rx) = make_session();
        session.force_idle_for_test(Duration::from_secs(120));
        assert!(session.idle_for() >= Duration::from_secs(120));
        session.touch();
        assert!(session.idle_for() < Duration::from_secs(1));
    }

    #[test]
    fn exit_reason_labels() {
        assert_eq!(ExitReason::Terminated.as_str(), "terminated");
        assert_eq!(ExitReason::IdleTimeout.as_str(), "idle_timeout");
        assert_eq!(ExitReason::Transport.as_str(), "transport");
        assert_eq!(ExitReason::Decode.as_str(), "decode");
    }

    // The full inbound loop needs a real WebSocket and is covered by
    // tests/integration.rs.
}

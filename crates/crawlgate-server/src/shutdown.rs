//! Graceful shutdown coordination.
//!
//! One `CancellationToken` fans out to the dispatcher, the sweep,
//! every session's iteration boundary, and the axum serve loop.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long to wait for tasks to drain before giving up.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Coordinates shutdown across all gateway tasks.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator with an unraised token.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// A token clone for a task to watch.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Raise the shutdown signal. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal shutdown and wait (bounded) for the given tasks to
    /// finish.
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DRAIN_TIMEOUT);
        self.shutdown();
        info!(task_count = handles.len(), "draining gateway tasks");
        let all = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, all).await.is_err() {
            warn!(timeout_secs = timeout.as_secs(), "drain timed out, abandoning remaining tasks");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

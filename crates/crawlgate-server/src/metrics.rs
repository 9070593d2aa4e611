//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics`
/// endpoint. Call once at startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Jobs published to the broker total (counter).
pub const JOBS_PUBLISHED_TOTAL: &str = "jobs_published_total";
/// Jobs rejected on decode total (counter).
pub const JOBS_REJECTED_TOTAL: &str = "jobs_rejected_total";
/// Job publish failures total (counter).
pub const JOBS_PUBLISH_FAILURES_TOTAL: &str = "jobs_publish_failures_total";
/// Results delivered to a session mailbox total (counter).
pub const RESULTS_DISPATCHED_TOTAL: &str = "results_dispatched_total";
/// Results discarded as malformed total (counter).
pub const RESULTS_DISCARDED_TOTAL: &str = "results_discarded_total";
/// Results dropped on a full mailbox total (counter).
pub const RESULTS_DROPPED_TOTAL: &str = "results_dropped_total";
/// Results for disconnected clients total (counter).
pub const RESULTS_ORPHANED_TOTAL: &str = "results_orphaned_total";

//! Result dispatcher — the singleton consumer of the `doneJobs`
//! topic.
//!
//! Exactly one dispatcher runs per process, started by the server,
//! never per connection: a consumer per connection would race over
//! the results topic and double-process completions.
//!
//! Every consumed message is acknowledged after processing, never
//! before, so a crash between receipt and ack leaves the result
//! redeliverable. Processing is idempotent on redelivery: a lookup
//! miss is harmless and a duplicate write to a still-connected client
//! is acceptable duplication.

use std::sync::Arc;
use std::time::Duration;

use crawlgate_broker::{Broker, DONE_JOBS_TOPIC, Delivery};
use crawlgate_core::messages::DoneJob;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::metrics as names;
use crate::websocket::registry::ConnectionRegistry;

/// Run the dispatcher until cancelled.
///
/// Empty polls and broker errors back off for `poll_interval` before
/// retrying; consumption is retried indefinitely.
pub async fn run_dispatcher(
    broker: Arc<dyn Broker>,
    registry: Arc<ConnectionRegistry>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    debug!("result dispatcher started");
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = broker.try_consume(DONE_JOBS_TOPIC) => next,
        };

        match next {
            Ok(Some(delivery)) => dispatch_one(delivery, &registry).await,
            Ok(None) => {
                trace!("no results pending");
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(poll_interval) => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "consume from results topic failed");
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }
    debug!("result dispatcher stopped");
}

/// Route one completed job back to its originating session, then
/// acknowledge the delivery.
async fn dispatch_one(delivery: Delivery, registry: &ConnectionRegistry) {
    match DoneJob::decode(delivery.payload()) {
        Err(e) => {
            // A result no one can route must not be redelivered
            // forever; discard it.
            warn!(error = %e, "malformed result, discarding");
            counter!(names::RESULTS_DISCARDED_TOTAL).increment(1);
        }
        Ok(done) => match registry.get(&done.client_id).await {
            Some(session) => match done.encode() {
                Ok(text) => {
                    if session.enqueue(text) {
                        debug!(client_id = %done.client_id, "result dispatched");
                        counter!(names::RESULTS_DISPATCHED_TOTAL).increment(1);
                    } else {
                        warn!(client_id = %done.client_id, "result dropped, mailbox full or closing");
                        counter!(names::RESULTS_DROPPED_TOTAL).increment(1);
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode result"),
            },
            None => {
                // The client disconnected before its result arrived.
                // Defined, non-error outcome: drop silently.
                debug!(client_id = %done.client_id, "no session for result, dropping");
                counter!(names::RESULTS_ORPHANED_TOTAL).increment(1);
            }
        },
    }

    // Ack strictly after processing.
    if let Err(e) = delivery.ack().await {
        warn!(error = %e, "failed to ack result");
    }
}

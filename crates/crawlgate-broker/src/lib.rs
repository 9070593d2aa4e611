//! # crawlgate-broker
//!
//! The gateway's narrow seam to the external work-distribution
//! broker: publish a message to a topic, poll a topic for the next
//! pending message, acknowledge it once processed.
//!
//! Two implementations:
//! - [`AmqpBroker`] — lapin/AMQP 0.9.1 against a real broker
//! - [`MemoryBroker`] — in-process queues for tests and local runs
//!
//! [`Broker::try_consume`] is deliberately a poll (`Ok(None)` means
//! nothing pending) so the caller owns its backoff policy.

#![deny(unsafe_code)]

mod amqp;
mod memory;

pub use amqp::AmqpBroker;
pub use memory::MemoryBroker;

use async_trait::async_trait;

/// Topic carrying client-submitted crawl jobs (gateway publishes,
/// workers consume).
pub const JOBS_TOPIC: &str = "jobs";

/// Topic carrying completed crawl results (workers publish, the
/// gateway's dispatcher consumes).
pub const DONE_JOBS_TOPIC: &str = "doneJobs";

/// Broker operation failure.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Could not reach or authenticate to the broker.
    #[error("broker connect failed: {0}")]
    Connect(String),
    /// A publish was rejected or the channel failed mid-publish.
    #[error("publish to '{topic}' failed: {reason}")]
    Publish {
        /// Target topic.
        topic: String,
        /// Underlying failure.
        reason: String,
    },
    /// A consume operation failed.
    #[error("consume from '{topic}' failed: {reason}")]
    Consume {
        /// Source topic.
        topic: String,
        /// Underlying failure.
        reason: String,
    },
    /// Acknowledging a delivery failed.
    #[error("ack failed: {0}")]
    Ack(String),
}

/// Deferred acknowledgment for a consumed message.
#[async_trait]
pub trait Acknowledge: Send {
    /// Acknowledge the delivery to the broker.
    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;
}

/// One message pulled off a topic, acknowledged explicitly after
/// processing. Dropping a `Delivery` without calling [`ack`] leaves
/// the message redeliverable on the broker side.
///
/// [`ack`]: Delivery::ack
pub struct Delivery {
    payload: Vec<u8>,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    /// Assemble a delivery from a payload and its acknowledger.
    pub fn new(payload: Vec<u8>, acker: Box<dyn Acknowledge>) -> Self {
        Self { payload, acker }
    }

    /// The raw message bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Acknowledge the message, consuming the delivery.
    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// Publish/consume operations against the external broker.
///
/// Implementations must be safe for concurrent invocation: every
/// session publishes through the same shared handle.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a message to a topic.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Pull the next pending message from a topic, if any.
    ///
    /// Returns `Ok(None)` when the topic has nothing pending; the
    /// caller decides how to back off.
    async fn try_consume(&self, topic: &str) -> Result<Option<Delivery>, BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_match_wire_contract() {
        assert_eq!(JOBS_TOPIC, "jobs");
        assert_eq!(DONE_JOBS_TOPIC, "doneJobs");
    }

    #[test]
    fn error_display_names_topic() {
        let e = BrokerError::Publish {
            topic: "jobs".into(),
            reason: "channel closed".into(),
        };
        let s = e.to_string();
        assert!(s.contains("jobs"));
        assert!(s.contains("channel closed"));
    }

    #[test]
    fn delivery_debug_hides_payload() {
        struct NoopAck;
        #[async_trait]
        impl Acknowledge for NoopAck {
            async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
                Ok(())
            }
        }
        let d = Delivery::new(vec![1, 2, 3], Box::new(NoopAck));
        let s = format!("{d:?}");
        assert!(s.contains("payload_len"));
    }
}

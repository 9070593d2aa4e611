//! In-process broker for tests and broker-less local runs.
//!
//! Mirrors the at-least-once contract of the AMQP client: a consumed
//! message sits in an unacked table until [`Delivery::ack`] removes
//! it, and [`MemoryBroker::redeliver_unacked`] puts unacked messages
//! back at the front of the queue (a simulated crash before ack).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{Acknowledge, Broker, BrokerError, Delivery};

#[derive(Default)]
struct TopicQueue {
    pending: VecDeque<Vec<u8>>,
    unacked: HashMap<u64, Vec<u8>>,
    next_tag: u64,
}

/// Broker backed by in-process queues. Cheap to clone; clones share
/// the same queues.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    topics: Arc<Mutex<HashMap<String, TopicQueue>>>,
    publish_failure: Arc<AtomicBool>,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending (not yet consumed) messages on a topic.
    pub fn depth(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map_or(0, |q| q.pending.len())
    }

    /// Number of consumed-but-unacknowledged messages on a topic.
    pub fn unacked(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map_or(0, |q| q.unacked.len())
    }

    /// Toggle publish failure injection; while enabled every
    /// `publish` returns an error, simulating a broker outage.
    pub fn fail_publishes(&self, fail: bool) {
        self.publish_failure.store(fail, Ordering::Relaxed);
    }

    /// Requeue every unacknowledged message, as the broker would
    /// after losing its consumer.
    pub fn redeliver_unacked(&self, topic: &str) -> usize {
        let mut topics = self.topics.lock();
        let Some(queue) = topics.get_mut(topic) else {
            return 0;
        };
        let mut tags: Vec<u64> = queue.unacked.keys().copied().collect();
        tags.sort_unstable();
        let count = tags.len();
        for tag in tags.into_iter().rev() {
            if let Some(payload) = queue.unacked.remove(&tag) {
                queue.pending.push_front(payload);
            }
        }
        count
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        if self.publish_failure.load(Ordering::Relaxed) {
            return Err(BrokerError::Publish {
                topic: topic.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        let mut topics = self.topics.lock();
        topics.entry(topic.to_string()).or_default().pending.push_back(payload);
        Ok(())
    }

    async fn try_consume(&self, topic: &str) -> Result<Option<Delivery>, BrokerError> {
        let mut topics = self.topics.lock();
        let queue = topics.entry(topic.to_string()).or_default();
        let Some(payload) = queue.pending.pop_front() else {
            return Ok(None);
        };
        let tag = queue.next_tag;
        queue.next_tag += 1;
        let _ = queue.unacked.insert(tag, payload.clone());
        Ok(Some(Delivery::new(
            payload,
            Box::new(MemoryAcker {
                topics: Arc::clone(&self.topics),
                topic: topic.to_string(),
                tag,
            }),
        )))
    }
}

struct MemoryAcker {
    topics: Arc<Mutex<HashMap<String, TopicQueue>>>,
    topic: String,
    tag: u64,
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        let mut topics = self.topics.lock();
        if let Some(queue) = topics.get_mut(&self.topic) {
            let _ = queue.unacked.remove(&self.tag);
        }
        Ok(())
    }
}

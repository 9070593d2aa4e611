//! Wire message types.
//!
//! Both sides of the bridge speak JSON with camelCase field names:
//! clients submit [`Job`]s over the WebSocket, workers hand back
//! [`DoneJob`]s through the broker. The crawl payload and result are
//! opaque to the gateway and carried as raw JSON values.

use serde::{Deserialize, Serialize};

use crate::ids::ClientId;

/// A crawl request submitted by a client.
///
/// `client_id` is optional on the wire: when a client omits it, the
/// session stamps its server-assigned id before publishing so the
/// result can be routed back.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Identifier of the submitting session; the routing key for the
    /// eventual result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    /// Crawl target and parameters, opaque to the gateway.
    pub payload: serde_json::Value,
}

/// A completed crawl result produced by a worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneJob {
    /// Identifier of the client that should receive this result.
    pub client_id: ClientId,
    /// Crawl outcome, opaque to the gateway.
    pub result: serde_json::Value,
}

impl Job {
    /// Decode a job from raw wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Encode the job for publishing to the broker.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl DoneJob {
    /// Decode a completed job from raw broker bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Encode the result for delivery to a client.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

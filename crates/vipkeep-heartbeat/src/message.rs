//! ---
//! vk_section: "03-heartbeat-membership"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "Heartbeat wire protocol and peer liveness tracking."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

/// Priority assumed for peers speaking the legacy plain-string dialect.
pub const LEGACY_PEER_PRIORITY: i32 = 100;

/// Heartbeat payload broadcast to every configured peer endpoint.
///
/// `k8s_mode` advertises that the sender gates its own eligibility on an
/// external readiness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub node_id: String,
    pub priority: i32,
    pub healthy: bool,
    pub k8s_mode: bool,
}

impl HeartbeatMessage {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// A datagram accepted by the receiver. Anything that is not valid JSON
/// is taken as the legacy dialect where the whole payload is the node id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedHeartbeat {
    Message(HeartbeatMessage),
    Legacy(String),
}

pub fn decode(payload: &[u8]) -> DecodedHeartbeat {
    match serde_json::from_slice::<HeartbeatMessage>(payload) {
        Ok(message) => DecodedHeartbeat::Message(message),
        Err(_) => DecodedHeartbeat::Legacy(String::from_utf8_lossy(payload).into_owned()),
    }
}

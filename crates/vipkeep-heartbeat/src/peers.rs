//! ---
//! vk_section: "03-heartbeat-membership"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "Heartbeat wire protocol and peer liveness tracking."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Last observed state of one remote node, keyed by node id in the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub last_seen: Instant,
    pub priority: i32,
    pub healthy: bool,
    pub k8s_mode: bool,
}

/// What an upsert changed, so the receiver can log discovery and health
/// transitions without spamming steady state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerUpdate {
    Discovered,
    HealthChanged { from: bool, to: bool },
    Refreshed,
}

/// Mutex-guarded table of observed peers.
///
/// Writers are the receiver loop; readers are the election. Records older
/// than the staleness timeout are invisible to `live_peers` and purged on
/// the same call so the table stays bounded under churn.
#[derive(Debug)]
pub struct PeerTable {
    timeout: Duration,
    inner: Mutex<HashMap<String, PeerRecord>>,
}

impl PeerTable {
    /// `timeout` is twice the heartbeat interval.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn staleness_timeout(&self) -> Duration {
        self.timeout
    }

    /// Upsert a record observed at `now`.
    pub fn observe(
        &self,
        node_id: &str,
        priority: i32,
        healthy: bool,
        k8s_mode: bool,
        now: Instant,
    ) -> PeerUpdate {
        let mut inner = self.inner.lock();
        let record = PeerRecord {
            last_seen: now,
            priority,
            healthy,
            k8s_mode,
        };
        match inner.insert(node_id.to_owned(), record) {
            None => PeerUpdate::Discovered,
            Some(previous) if previous.healthy != healthy => PeerUpdate::HealthChanged {
                from: previous.healthy,
                to: healthy,
            },
            Some(_) => PeerUpdate::Refreshed,
        }
    }

    /// Snapshot of all live records. Stale entries are dropped from the
    /// snapshot and removed from the table in the same pass.
    pub fn live_peers(&self, now: Instant) -> HashMap<String, PeerRecord> {
        let mut inner = self.inner.lock();
        inner.retain(|_, record| now.saturating_duration_since(record.last_seen) <= self.timeout);
        inner.clone()
    }
}

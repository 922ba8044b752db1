//! ---
//! vk_section: "04-leader-election"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "Deterministic leader selection over peer snapshots."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
use std::cmp::Ordering;

/// One node as seen by the election: the local node or a live peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub node_id: String,
    pub priority: i32,
    pub healthy: bool,
}

/// Pick the leader from a candidate snapshot.
///
/// Pure and deterministic: identical inputs produce identical leaders on
/// every node, which is the whole basis for cluster-wide agreement once
/// heartbeats converge. Ordering is total because priority ties break on
/// the node id.
///
/// With the probe disabled the cluster has no health dimension and the
/// smallest node id wins. With it enabled, healthy candidates are
/// preferred; when nobody is healthy the full set is reconsidered so the
/// cluster still elects someone rather than dropping the address
/// entirely.
pub fn select_leader(local_probe_enabled: bool, candidates: &[Candidate]) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }

    if !local_probe_enabled {
        return candidates
            .iter()
            .map(|candidate| candidate.node_id.as_str())
            .min()
            .map(str::to_owned);
    }

    let healthy: Vec<&Candidate> = candidates.iter().filter(|c| c.healthy).collect();
    let pool: Vec<&Candidate> = if healthy.is_empty() {
        candidates.iter().collect()
    } else {
        healthy
    };

    pool.into_iter()
        .min_by(|a, b| claim_cmp(a, b))
        .map(|winner| winner.node_id.clone())
}

fn claim_cmp(a: &Candidate, b: &Candidate) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| a.node_id.cmp(&b.node_id))
}

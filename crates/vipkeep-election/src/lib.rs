//! ---
//! vk_section: "04-leader-election"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "Deterministic leader selection over peer snapshots."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
//! Election evaluator: recomputes the leader from the local health signal
//! plus the live peer snapshot, on a ticker and on every probe
//! transition, and publishes changes on a level-triggered watch stream.
//!
//! The election is best-effort: each node decides from its own view, so a
//! partition or heartbeat-loss window can yield two masters until views
//! reconverge. The VIP is an availability optimisation, not a fence.

mod select;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use vipkeep_common::AppConfig;
use vipkeep_heartbeat::PeerTable;
use vipkeep_metrics::ClusterMetrics;

pub use select::{select_leader, Candidate};

/// Cadence of the periodic status line when nothing changes.
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct EvaluatorState {
    leader: Option<String>,
    last_status_log: Option<Instant>,
}

/// Recomputes leadership and answers `is_leader` for the VIP manager.
#[derive(Debug)]
pub struct ElectionEvaluator {
    node_id: String,
    priority: i32,
    probe_enabled: bool,
    election_period: Duration,
    peers: Arc<PeerTable>,
    health: watch::Receiver<bool>,
    state: Mutex<EvaluatorState>,
    leader_tx: Arc<watch::Sender<Option<String>>>,
    metrics: Option<ClusterMetrics>,
}

impl ElectionEvaluator {
    pub fn new(
        config: &AppConfig,
        peers: Arc<PeerTable>,
        health: watch::Receiver<bool>,
        metrics: Option<ClusterMetrics>,
    ) -> Self {
        let (leader_tx, _leader_rx) = watch::channel(None);
        Self {
            node_id: config.node_id.clone(),
            priority: config.priority,
            probe_enabled: config.k8s.enabled,
            election_period: config.election_timeout,
            peers,
            health,
            state: Mutex::new(EvaluatorState {
                leader: None,
                last_status_log: None,
            }),
            leader_tx: Arc::new(leader_tx),
            metrics,
        }
    }

    /// Whether this node currently considers itself leader.
    pub fn is_leader(&self) -> bool {
        self.state.lock().leader.as_deref() == Some(self.node_id.as_str())
    }

    /// Latest elected leader, if an evaluation has run.
    pub fn current_leader(&self) -> Option<String> {
        self.state.lock().leader.clone()
    }

    /// Leader-change stream. Single slot; new values overwrite unread
    /// ones, so consumers must re-query `is_leader` rather than trust the
    /// payload alone.
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.leader_tx.subscribe()
    }

    /// Run one evaluation against a fresh peer snapshot.
    pub fn evaluate_now(&self) {
        let now = Instant::now();
        let live = self.peers.live_peers(now);
        let local_healthy = if self.probe_enabled {
            *self.health.borrow()
        } else {
            true
        };

        let mut candidates = Vec::with_capacity(live.len() + 1);
        candidates.push(Candidate {
            node_id: self.node_id.clone(),
            priority: self.priority,
            healthy: local_healthy,
        });
        for (node_id, record) in &live {
            // A probe-less peer must not steal leadership from a
            // probe-aware cohort; it stays in the set and can still win
            // through the all-unhealthy fallback.
            let healthy = record.healthy && !(self.probe_enabled && !record.k8s_mode);
            candidates.push(Candidate {
                node_id: node_id.clone(),
                priority: record.priority,
                healthy,
            });
        }

        let new_leader = select_leader(self.probe_enabled, &candidates)
            .unwrap_or_else(|| self.node_id.clone());

        let mut state = self.state.lock();
        let old_leader = state.leader.clone();
        let changed = old_leader.as_deref() != Some(new_leader.as_str());
        state.leader = Some(new_leader.clone());

        if changed {
            info!(
                node = %self.node_id,
                old = old_leader.as_deref().unwrap_or("<none>"),
                new = %new_leader,
                local_healthy,
                peers = live.len(),
                "leadership changed"
            );
            for candidate in &candidates {
                debug!(
                    node = %self.node_id,
                    candidate = %candidate.node_id,
                    priority = candidate.priority,
                    healthy = candidate.healthy,
                    "election candidate"
                );
            }
            let _ = self.leader_tx.send(Some(new_leader.clone()));
            if let Some(metrics) = &self.metrics {
                metrics.inc_leader_change();
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.set_leader(new_leader == self.node_id);
            metrics.set_live_peers(live.len());
        }

        let due = state
            .last_status_log
            .map(|at| now.duration_since(at) >= STATUS_LOG_INTERVAL)
            .unwrap_or(true);
        if changed || due {
            state.last_status_log = Some(now);
            let healthy_count = candidates.iter().filter(|c| c.healthy).count();
            info!(
                node = %self.node_id,
                leader = %new_leader,
                probe_enabled = self.probe_enabled,
                healthy_nodes = healthy_count,
                total_nodes = candidates.len(),
                "election status"
            );
        }
    }

    /// Spawn the evaluation loop: periodic ticker plus immediate
    /// re-evaluation on every stable-health transition.
    pub fn start(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(node = %self.node_id, period = ?self.election_period, "election evaluator started");
            let mut ticker = tokio::time::interval(self.election_period);
            let mut health = self.health.clone();
            let mut health_closed = false;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!(node = %self.node_id, "election evaluator stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.evaluate_now();
                    }
                    changed = health.changed(), if !health_closed => {
                        match changed {
                            Ok(()) => {
                                let healthy = *health.borrow_and_update();
                                info!(node = %self.node_id, healthy, "local readiness changed; re-evaluating leadership");
                                if let Some(metrics) = &self.metrics {
                                    metrics.set_probe_healthy(healthy);
                                }
                                self.evaluate_now();
                            }
                            Err(_) => {
                                health_closed = true;
                            }
                        }
                    }
                }
            }
        })
    }
}

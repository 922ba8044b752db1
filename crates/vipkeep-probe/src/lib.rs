//! ---
//! vk_section: "02-readiness-probing"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "External readiness probing and health debouncing."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
//! Readiness prober: polls an external `/readyz` endpoint and exposes a
//! debounced healthy/unhealthy signal for the local node. A node whose
//! probe is disabled by configuration simply never constructs a prober
//! and is treated as unconditionally healthy by the election.

mod checker;
mod debounce;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vipkeep_common::config::K8sConfig;

pub use checker::ReadyzChecker;
pub use debounce::{DebounceOutcome, HealthDebouncer, MIN_DWELL};

/// Cadence of raw probe samples.
pub const PROBE_PERIOD: Duration = Duration::from_secs(2);

/// Polls the configured endpoint and publishes the debounced signal.
///
/// `subscribe` hands out a watch receiver that yields a new value exactly
/// when the stable signal transitions; `is_stable_healthy` answers from
/// the debouncer directly.
#[derive(Debug)]
pub struct ReadinessProber {
    node_id: String,
    checker: Arc<ReadyzChecker>,
    debouncer: Arc<Mutex<HealthDebouncer>>,
    health_tx: Arc<watch::Sender<bool>>,
}

impl ReadinessProber {
    pub fn new(node_id: impl Into<String>, config: &K8sConfig) -> Result<Self> {
        let checker = ReadyzChecker::from_config(config)?;
        let (health_tx, _health_rx) = watch::channel(true);
        Ok(Self {
            node_id: node_id.into(),
            checker: Arc::new(checker),
            debouncer: Arc::new(Mutex::new(HealthDebouncer::new())),
            health_tx: Arc::new(health_tx),
        })
    }

    /// Latest debounced health value.
    pub fn is_stable_healthy(&self) -> bool {
        self.debouncer.lock().stable_ok()
    }

    /// Watch stream of stable-health transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.health_tx.subscribe()
    }

    /// Spawn the probe loop. The task exits when the shutdown channel
    /// fires, observed within one probe period.
    pub fn start(&self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let node_id = self.node_id.clone();
        let checker = self.checker.clone();
        let debouncer = self.debouncer.clone();
        let health_tx = self.health_tx.clone();

        tokio::spawn(async move {
            info!(node = %node_id, "readiness prober started");
            let mut ticker = tokio::time::interval(PROBE_PERIOD);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!(node = %node_id, "readiness prober stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        // The probe runs on its own task so that a panic in
                        // the HTTP stack degrades to an unhealthy sample
                        // instead of taking the loop down.
                        let probe = {
                            let checker = checker.clone();
                            tokio::spawn(async move { checker.probe_once().await })
                        };
                        let raw_ok = match probe.await {
                            Ok(ok) => ok,
                            Err(err) => {
                                warn!(node = %node_id, error = %err, "probe task failed; sample treated as unhealthy");
                                false
                            }
                        };

                        let outcome = {
                            let mut debouncer = debouncer.lock();
                            let outcome = debouncer.observe(raw_ok, Instant::now());
                            if let DebounceOutcome::Committed(stable) = outcome {
                                let _ = health_tx.send(stable);
                            }
                            outcome
                        };
                        match outcome {
                            DebounceOutcome::Committed(stable) => {
                                info!(node = %node_id, healthy = stable, "readiness stabilised");
                            }
                            DebounceOutcome::Suppressed => {
                                debug!(node = %node_id, raw = raw_ok, "readiness change suppressed inside dwell window");
                            }
                            DebounceOutcome::Unchanged => {}
                        }
                    }
                }
            }
        })
    }
}

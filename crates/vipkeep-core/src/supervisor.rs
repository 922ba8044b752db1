//! ---
//! vk_section: "01-core-runtime"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "Component wiring and lifecycle supervision."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use vipkeep_common::AppConfig;
use vipkeep_election::ElectionEvaluator;
use vipkeep_heartbeat::{HeartbeatTasks, HeartbeatTransport};
use vipkeep_metrics::ClusterMetrics;
use vipkeep_probe::ReadinessProber;
use vipkeep_vip::{
    InterfaceBinder, IpCommandBinder, L2Announcer, LeadershipView, ToolAnnouncer, VipManager,
    VipState,
};

/// Adapter handing the election's ground truth to the VIP manager.
struct EvaluatorView(Arc<ElectionEvaluator>);

impl LeadershipView for EvaluatorView {
    fn is_leader(&self) -> bool {
        self.0.is_leader()
    }
}

/// Owns construction of the four control-loop components and their
/// wiring: probe health feeds the heartbeat sender and the election, the
/// election's leader stream feeds the VIP manager.
pub struct Supervisor {
    config: Arc<AppConfig>,
    metrics: Option<ClusterMetrics>,
    binder: Arc<dyn InterfaceBinder>,
    announcer: Arc<dyn L2Announcer>,
}

impl Supervisor {
    /// Production wiring: `ip`-backed binder and tool-based announcer.
    pub fn new(config: AppConfig, metrics: Option<ClusterMetrics>) -> Self {
        Self {
            config: Arc::new(config),
            metrics,
            binder: Arc::new(IpCommandBinder),
            announcer: Arc::new(ToolAnnouncer::detect()),
        }
    }

    /// Same wiring with injected OS capabilities.
    pub fn with_capabilities(
        config: AppConfig,
        metrics: Option<ClusterMetrics>,
        binder: Arc<dyn InterfaceBinder>,
        announcer: Arc<dyn L2Announcer>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            metrics,
            binder,
            announcer,
        }
    }

    /// Start every component in dependency order and return the handle
    /// used for ordered shutdown.
    pub async fn start(self) -> Result<SupervisorHandle> {
        let config = self.config.clone();

        // A: readiness prober, or a health signal pinned to `true` when
        // the probe is disabled.
        let (probe_shutdown, _) = broadcast::channel(4);
        let mut prober = None;
        let mut pinned_health = None;
        let health_rx = if config.k8s.enabled {
            let probe = ReadinessProber::new(config.node_id.clone(), &config.k8s)
                .context("failed to construct readiness prober")?;
            let health_rx = probe.subscribe();
            prober = Some(probe);
            health_rx
        } else {
            info!(node = %config.node_id, "readiness probe disabled; node advertises healthy");
            let (health_tx, health_rx) = watch::channel(true);
            pinned_health = Some(health_tx);
            health_rx
        };
        let probe_task = prober
            .as_ref()
            .map(|probe| probe.start(probe_shutdown.subscribe()));

        // B: heartbeat transport.
        let (heartbeat_shutdown, _) = broadcast::channel(4);
        let transport = HeartbeatTransport::new(&config, health_rx.clone());
        let heartbeat_tasks = match transport.start(&heartbeat_shutdown).await {
            Ok(tasks) => tasks,
            Err(err) => {
                let _ = probe_shutdown.send(());
                return Err(err).context("failed to start heartbeat transport");
            }
        };

        // C: election evaluator.
        let (election_shutdown, _) = broadcast::channel(4);
        let election = Arc::new(ElectionEvaluator::new(
            &config,
            transport.peer_table(),
            health_rx,
            self.metrics.clone(),
        ));
        let leader_rx = election.subscribe();
        let election_task = election.clone().start(election_shutdown.subscribe());

        // D: VIP manager.
        let (vip_shutdown, _) = broadcast::channel(4);
        let vip_manager = Arc::new(
            VipManager::new(&config, self.binder, self.announcer, self.metrics.clone())
                .context("failed to construct VIP manager")?,
        );
        let view: Arc<dyn LeadershipView> = Arc::new(EvaluatorView(election.clone()));
        let vip_task = vip_manager
            .clone()
            .start(view, leader_rx, vip_shutdown.subscribe());

        info!(
            node = %config.node_id,
            vip = %config.vip,
            interface = %config.interface,
            peers = config.peers.len(),
            probe_enabled = config.k8s.enabled,
            "supervisor started"
        );

        Ok(SupervisorHandle {
            config,
            election,
            vip_manager,
            probe_shutdown,
            heartbeat_shutdown,
            election_shutdown,
            vip_shutdown,
            probe_task,
            heartbeat_tasks: Some(heartbeat_tasks),
            election_task: Some(election_task),
            vip_task: Some(vip_task),
            pinned_health,
        })
    }
}

/// Handle returned from supervisor startup; owns every component task.
pub struct SupervisorHandle {
    config: Arc<AppConfig>,
    election: Arc<ElectionEvaluator>,
    vip_manager: Arc<VipManager>,
    probe_shutdown: broadcast::Sender<()>,
    heartbeat_shutdown: broadcast::Sender<()>,
    election_shutdown: broadcast::Sender<()>,
    vip_shutdown: broadcast::Sender<()>,
    probe_task: Option<JoinHandle<()>>,
    heartbeat_tasks: Option<HeartbeatTasks>,
    election_task: Option<JoinHandle<()>>,
    vip_task: Option<JoinHandle<()>>,
    // Keeps the always-healthy signal alive for probe-less nodes.
    pinned_health: Option<watch::Sender<bool>>,
}

impl SupervisorHandle {
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn is_leader(&self) -> bool {
        self.election.is_leader()
    }

    pub fn current_leader(&self) -> Option<String> {
        self.election.current_leader()
    }

    pub async fn vip_state(&self) -> VipState {
        self.vip_manager.state().await
    }

    /// Stop the components in reverse dependency order: election first so
    /// no further transitions are produced, then the VIP manager with a
    /// final release, then the transport, then the prober.
    pub async fn shutdown(mut self) -> Result<()> {
        info!(node = %self.config.node_id, "supervisor shutting down");

        let _ = self.election_shutdown.send(());
        join_task("election", self.election_task.take()).await;

        let _ = self.vip_shutdown.send(());
        join_task("vip-manager", self.vip_task.take()).await;
        self.vip_manager.release_now().await;
        if self.vip_manager.state().await == VipState::Assigned {
            warn!(node = %self.config.node_id, "VIP still assigned after release attempt");
        }

        let _ = self.heartbeat_shutdown.send(());
        if let Some(tasks) = self.heartbeat_tasks.take() {
            tasks.join().await;
        }

        let _ = self.probe_shutdown.send(());
        join_task("readiness-prober", self.probe_task.take()).await;

        drop(self.pinned_health.take());
        info!(node = %self.config.node_id, "supervisor shutdown complete");
        Ok(())
    }
}

async fn join_task(name: &str, task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        if let Err(err) = task.await {
            error!(task = name, error = %err, "component task join error");
        }
    }
}

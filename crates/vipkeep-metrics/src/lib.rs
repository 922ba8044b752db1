//! ---
//! vk_section: "06-observability"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "Metrics collection and export utilities."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
//! One metric holder for the whole daemon plus the HTTP exporter that
//! serves it. vipkeep is a single process running a single control loop,
//! so unlike a multi-service registry there is exactly one
//! [`ClusterMetrics`] constructed at startup and threaded to the
//! components that record into it.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// HTTP exporter serving the registry at `/metrics`.
///
/// Binding is async and reports the effective address, so tests can pass
/// port 0 and scrape whatever the kernel assigned.
pub struct MetricsExporter {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsExporter {
    pub async fn bind(registry: SharedRegistry, addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics listener {}", addr))?;
        let addr = listener
            .local_addr()
            .context("metrics listener has no local address")?;

        let app = Router::new()
            .route("/metrics", get(scrape))
            .with_state(registry);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await
                .context("metrics exporter failed")
        });

        info!(address = %addr, "metrics exporter listening");
        Ok(Self {
            addr,
            stop: Some(stop_tx),
            task,
        })
    }

    /// Effective listen address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Drain in-flight scrapes and stop serving.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

async fn scrape(State(registry): State<SharedRegistry>) -> Response {
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&registry.gather()) {
        Ok(body) => ([(header::CONTENT_TYPE, encoder.format_type())], body).into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Everything the failover control loop exposes about itself.
///
/// Build metadata rides along as a labelled gauge; per-process trivia
/// like start counters or config-load timings are deliberately absent,
/// since a daemon that loads its configuration exactly once per process
/// has nothing to aggregate there.
#[derive(Clone, Debug)]
pub struct ClusterMetrics {
    registry: SharedRegistry,
    build_info: IntGaugeVec,
    is_leader: IntGauge,
    live_peers: IntGauge,
    probe_healthy: IntGauge,
    leader_changes: IntCounter,
    vip_transitions: IntCounterVec,
}

impl ClusterMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let build_info = IntGaugeVec::new(
            Opts::new(
                "vipkeep_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version", "commit"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        let is_leader = IntGauge::with_opts(Opts::new(
            "vipkeep_is_leader",
            "Indicator (0/1) whether this node currently holds leadership",
        ))?;
        registry.register(Box::new(is_leader.clone()))?;

        let live_peers = IntGauge::with_opts(Opts::new(
            "vipkeep_live_peers",
            "Number of non-stale peers visible in the heartbeat table",
        ))?;
        registry.register(Box::new(live_peers.clone()))?;

        let probe_healthy = IntGauge::with_opts(Opts::new(
            "vipkeep_probe_healthy",
            "Indicator (0/1) of the debounced local readiness signal",
        ))?;
        registry.register(Box::new(probe_healthy.clone()))?;

        let leader_changes = IntCounter::with_opts(Opts::new(
            "vipkeep_leader_changes_total",
            "Count of leadership transitions observed by the election loop",
        ))?;
        registry.register(Box::new(leader_changes.clone()))?;

        let vip_transitions = IntCounterVec::new(
            Opts::new(
                "vipkeep_vip_transitions_total",
                "Count of successful VIP state transitions by operation",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(vip_transitions.clone()))?;

        Ok(Self {
            registry,
            build_info,
            is_leader,
            live_peers,
            probe_healthy,
            leader_changes,
            vip_transitions,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn set_build_info(&self, version: &str, commit: &str) {
        self.build_info
            .with_label_values(&[version, commit])
            .set(1);
    }

    pub fn set_leader(&self, leader: bool) {
        self.is_leader.set(if leader { 1 } else { 0 });
    }

    pub fn set_live_peers(&self, count: usize) {
        self.live_peers.set(count as i64);
    }

    pub fn set_probe_healthy(&self, healthy: bool) {
        self.probe_healthy.set(if healthy { 1 } else { 0 });
    }

    pub fn inc_leader_change(&self) {
        self.leader_changes.inc();
    }

    pub fn record_vip_transition(&self, operation: &str) {
        self.vip_transitions.with_label_values(&[operation]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_metrics_register_and_update() {
        let registry = new_registry();
        let metrics = ClusterMetrics::new(registry.clone()).unwrap();
        metrics.set_leader(true);
        metrics.set_live_peers(2);
        metrics.record_vip_transition("add");

        let families = registry.gather();
        let leader = families
            .iter()
            .find(|fam| fam.get_name() == "vipkeep_is_leader")
            .expect("leader gauge registered");
        assert_eq!(leader.get_metric()[0].get_gauge().get_value(), 1.0);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = new_registry();
        let _first = ClusterMetrics::new(registry.clone()).unwrap();
        assert!(ClusterMetrics::new(registry).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn exporter_serves_scrapes_until_stopped() {
        let registry = new_registry();
        let metrics = ClusterMetrics::new(registry.clone()).unwrap();
        metrics.set_build_info("0.0.0-test", "deadbeef");
        metrics.set_leader(true);

        let exporter = MetricsExporter::bind(registry, "127.0.0.1:0".parse().unwrap())
            .await
            .expect("exporter binds on an ephemeral port");
        let url = format!("http://{}/metrics", exporter.addr());

        let body = reqwest::get(&url)
            .await
            .expect("scrape succeeds")
            .text()
            .await
            .expect("scrape body reads");
        assert!(body.contains("vipkeep_is_leader 1"));
        assert!(body.contains("deadbeef"));
        assert!(body.contains("vipkeep_build_info"));

        exporter.stop().await.expect("exporter stops cleanly");
        assert!(reqwest::get(&url).await.is_err());
    }
}

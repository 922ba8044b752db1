//! ---
//! vk_section: "04-leader-election"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "Deterministic leader selection over peer snapshots."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch};
use vipkeep_common::config::{K8sConfig, LoggingConfig, MetricsConfig};
use vipkeep_common::AppConfig;
use vipkeep_election::ElectionEvaluator;
use vipkeep_heartbeat::PeerTable;

fn node_config(node_id: &str, priority: i32, probe_enabled: bool) -> AppConfig {
    AppConfig {
        node_id: node_id.into(),
        priority,
        interface: "lo".into(),
        vip: "127.0.0.200/32".into(),
        peers: Vec::new(),
        port: 9888,
        heartbeat_interval: Duration::from_millis(50),
        election_timeout: Duration::from_millis(20),
        tls_cert: None,
        tls_key: None,
        k8s: K8sConfig {
            enabled: probe_enabled,
            api_server: "https://127.0.0.1:6443".into(),
            ..K8sConfig::default()
        },
        logging: LoggingConfig::default(),
        metrics: MetricsConfig::default(),
    }
}

fn evaluator(
    config: &AppConfig,
    peers: Arc<PeerTable>,
    healthy: bool,
) -> (Arc<ElectionEvaluator>, watch::Sender<bool>) {
    let (health_tx, health_rx) = watch::channel(healthy);
    let evaluator = Arc::new(ElectionEvaluator::new(config, peers, health_rx, None));
    (evaluator, health_tx)
}

#[tokio::test]
async fn single_node_elects_itself() {
    let config = node_config("node-a", 10, false);
    let peers = Arc::new(PeerTable::new(config.heartbeat_timeout()));
    let (evaluator, _health) = evaluator(&config, peers, true);

    let mut leader_rx = evaluator.subscribe();
    evaluator.evaluate_now();

    assert!(evaluator.is_leader());
    assert_eq!(evaluator.current_leader().as_deref(), Some("node-a"));
    assert_eq!(leader_rx.borrow_and_update().as_deref(), Some("node-a"));
}

#[tokio::test]
async fn unhealthy_leader_yields_and_reclaims() {
    let config = node_config("node-a", 10, true);
    let peers = Arc::new(PeerTable::new(config.heartbeat_timeout()));
    peers.observe("node-b", 20, true, true, Instant::now());
    let (evaluator, health_tx) = evaluator(&config, peers.clone(), false);

    evaluator.evaluate_now();
    assert!(!evaluator.is_leader());
    assert_eq!(evaluator.current_leader().as_deref(), Some("node-b"));

    // Local readiness recovers; the stronger claim takes leadership back.
    health_tx.send(true).unwrap();
    peers.observe("node-b", 20, true, true, Instant::now());
    evaluator.evaluate_now();
    assert!(evaluator.is_leader());
}

#[tokio::test]
async fn probe_less_peer_cannot_outrank_probe_aware_node() {
    let config = node_config("node-a", 50, true);
    let peers = Arc::new(PeerTable::new(config.heartbeat_timeout()));
    // Better priority, claims healthy, but does not gate on a probe.
    peers.observe("node-b", 1, true, false, Instant::now());
    let (evaluator, _health) = evaluator(&config, peers, true);

    evaluator.evaluate_now();
    assert!(evaluator.is_leader());
}

#[tokio::test]
async fn probe_less_peer_wins_when_probe_cohort_is_unhealthy() {
    let config = node_config("node-a", 50, true);
    let peers = Arc::new(PeerTable::new(config.heartbeat_timeout()));
    peers.observe("node-b", 1, true, false, Instant::now());
    let (evaluator, _health) = evaluator(&config, peers, false);

    evaluator.evaluate_now();
    // Everyone is unhealthy in the local view, so selection falls back to
    // the full set and the probe-less peer's priority carries.
    assert!(!evaluator.is_leader());
    assert_eq!(evaluator.current_leader().as_deref(), Some("node-b"));
}

#[tokio::test]
async fn stale_peer_is_excluded_from_the_candidate_set() {
    let config = node_config("node-b", 20, false);
    let peers = Arc::new(PeerTable::new(Duration::from_millis(100)));
    peers.observe("node-a", 10, true, false, Instant::now());
    let (evaluator, _health) = evaluator(&config, peers, true);

    evaluator.evaluate_now();
    assert!(!evaluator.is_leader());

    tokio::time::sleep(Duration::from_millis(200)).await;
    evaluator.evaluate_now();
    assert!(evaluator.is_leader());
}

#[tokio::test]
async fn leader_stream_keeps_only_the_latest_value() {
    let config = node_config("node-b", 20, false);
    let peers = Arc::new(PeerTable::new(Duration::from_millis(100)));
    let (evaluator, _health) = evaluator(&config, peers.clone(), true);
    let mut leader_rx = evaluator.subscribe();

    evaluator.evaluate_now();
    peers.observe("node-a", 10, true, false, Instant::now());
    evaluator.evaluate_now();

    // Two transitions happened; an undrained consumer sees the latest.
    assert_eq!(leader_rx.borrow_and_update().as_deref(), Some("node-a"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ticker_drives_evaluation_and_shutdown_stops_the_loop() {
    let config = node_config("node-a", 10, false);
    let peers = Arc::new(PeerTable::new(config.heartbeat_timeout()));
    let (evaluator, _health) = evaluator(&config, peers, true);

    let (shutdown, _) = broadcast::channel(4);
    let task = evaluator.clone().start(shutdown.subscribe());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(evaluator.is_leader());

    let _ = shutdown.send(());
    task.await.expect("election loop joins cleanly");
}

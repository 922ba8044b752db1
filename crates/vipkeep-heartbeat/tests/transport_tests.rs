//! ---
//! vk_section: "03-heartbeat-membership"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "Heartbeat wire protocol and peer liveness tracking."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use vipkeep_common::config::{K8sConfig, LoggingConfig, MetricsConfig};
use vipkeep_common::AppConfig;
use vipkeep_heartbeat::HeartbeatTransport;

fn free_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").expect("bind probe socket");
    socket.local_addr().unwrap().port()
}

fn node_config(node_id: &str, priority: i32, port: u16, peers: Vec<String>) -> AppConfig {
    AppConfig {
        node_id: node_id.into(),
        priority,
        interface: "lo".into(),
        vip: "127.0.0.200/32".into(),
        peers,
        port,
        heartbeat_interval: Duration::from_millis(50),
        election_timeout: Duration::from_millis(100),
        tls_cert: None,
        tls_key: None,
        k8s: K8sConfig::default(),
        logging: LoggingConfig::default(),
        metrics: MetricsConfig::default(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_nodes_discover_each_other() {
    let port_a = free_udp_port();
    let port_b = free_udp_port();

    let config_a = node_config("node-a", 10, port_a, vec![format!("127.0.0.1:{}", port_b)]);
    let config_b = node_config("node-b", 20, port_b, vec![format!("127.0.0.1:{}", port_a)]);

    let (_health_a_tx, health_a) = watch::channel(true);
    let (_health_b_tx, health_b) = watch::channel(true);
    let transport_a = HeartbeatTransport::new(&config_a, health_a);
    let transport_b = HeartbeatTransport::new(&config_b, health_b);

    let (shutdown, _) = broadcast::channel(4);
    let tasks_a = transport_a.start(&shutdown).await.expect("start a");
    let tasks_b = transport_b.start(&shutdown).await.expect("start b");

    tokio::time::sleep(Duration::from_millis(300)).await;

    let seen_by_a = transport_a.live_peers();
    let record = seen_by_a.get("node-b").expect("a discovered b");
    assert_eq!(record.priority, 20);
    assert!(record.healthy);
    assert!(!record.k8s_mode);

    let seen_by_b = transport_b.live_peers();
    assert!(seen_by_b.contains_key("node-a"));

    let _ = shutdown.send(());
    tasks_a.join().await;
    tasks_b.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_peer_expires_from_live_set() {
    let port_a = free_udp_port();
    let port_b = free_udp_port();

    let config_a = node_config("node-a", 10, port_a, vec![format!("127.0.0.1:{}", port_b)]);
    let config_b = node_config("node-b", 20, port_b, vec![format!("127.0.0.1:{}", port_a)]);

    let (_health_a_tx, health_a) = watch::channel(true);
    let (_health_b_tx, health_b) = watch::channel(true);
    let transport_a = HeartbeatTransport::new(&config_a, health_a);
    let transport_b = HeartbeatTransport::new(&config_b, health_b);

    let (shutdown_a, _) = broadcast::channel(4);
    let (shutdown_b, _) = broadcast::channel(4);
    let tasks_a = transport_a.start(&shutdown_a).await.expect("start a");
    let tasks_b = transport_b.start(&shutdown_b).await.expect("start b");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(transport_a.live_peers().contains_key("node-b"));

    // Silence node-b; after twice the heartbeat interval it must vanish.
    let _ = shutdown_b.send(());
    tasks_b.join().await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(!transport_a.live_peers().contains_key("node-b"));

    let _ = shutdown_a.send(());
    tasks_a.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn legacy_datagram_admits_peer_with_defaults() {
    let port_a = free_udp_port();
    let config_a = node_config("node-a", 10, port_a, Vec::new());

    let (_health_tx, health) = watch::channel(true);
    let transport = HeartbeatTransport::new(&config_a, health);
    let (shutdown, _) = broadcast::channel(4);
    let tasks = transport.start(&shutdown).await.expect("start");

    let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender
        .send_to(b"ancient-node", ("127.0.0.1", port_a))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let peers = transport.live_peers();
    let record = peers.get("ancient-node").expect("legacy peer admitted");
    assert_eq!(record.priority, 100);
    // Probe disabled locally: a legacy peer counts as healthy.
    assert!(record.healthy);
    assert!(!record.k8s_mode);

    let _ = shutdown.send(());
    tasks.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn legacy_peer_is_unhealthy_when_local_probe_enabled() {
    let port_a = free_udp_port();
    let mut config_a = node_config("node-a", 10, port_a, Vec::new());
    config_a.k8s.enabled = true;
    config_a.k8s.api_server = "https://127.0.0.1:6443".into();

    let (_health_tx, health) = watch::channel(true);
    let transport = HeartbeatTransport::new(&config_a, health);
    let (shutdown, _) = broadcast::channel(4);
    let tasks = transport.start(&shutdown).await.expect("start");

    let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender
        .send_to(b"ancient-node", ("127.0.0.1", port_a))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let peers = transport.live_peers();
    let record = peers.get("ancient-node").expect("legacy peer admitted");
    assert!(!record.healthy);

    let _ = shutdown.send(());
    tasks.join().await;
}

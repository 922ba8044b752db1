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
use std::time::Duration;

use vipkeep_common::config::{K8sConfig, LoggingConfig, MetricsConfig};
use vipkeep_common::AppConfig;
use vipkeep_core::Supervisor;
use vipkeep_vip::{BinderOp, MemoryAnnouncer, MemoryBinder, VipState};

fn free_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").expect("bind probe socket");
    socket.local_addr().unwrap().port()
}

fn node_config(node_id: &str, priority: i32, port: u16, peers: Vec<String>) -> AppConfig {
    AppConfig {
        node_id: node_id.into(),
        priority,
        interface: "eth0".into(),
        vip: "192.168.1.100/24".into(),
        peers,
        port,
        heartbeat_interval: Duration::from_millis(50),
        election_timeout: Duration::from_millis(50),
        tls_cert: None,
        tls_key: None,
        k8s: K8sConfig::default(),
        logging: LoggingConfig::default(),
        metrics: MetricsConfig::default(),
    }
}

struct Node {
    binder: Arc<MemoryBinder>,
    announcer: Arc<MemoryAnnouncer>,
    supervisor: Supervisor,
}

fn node(config: AppConfig) -> Node {
    let binder = Arc::new(MemoryBinder::default());
    let announcer = Arc::new(MemoryAnnouncer::default());
    let supervisor = Supervisor::with_capabilities(
        config,
        None,
        binder.clone(),
        announcer.clone(),
    );
    Node {
        binder,
        announcer,
        supervisor,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_node_takes_and_releases_the_vip() {
    let port = free_udp_port();
    let node = node(node_config("node-a", 10, port, Vec::new()));

    let handle = node.supervisor.start().await.expect("supervisor starts");
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(handle.is_leader());
    assert_eq!(handle.current_leader().as_deref(), Some("node-a"));
    assert_eq!(handle.vip_state().await, VipState::Assigned);
    assert!(node.binder.is_bound());
    assert!(node.announcer.announcements() >= 1);

    handle.shutdown().await.expect("clean shutdown");
    assert!(!node.binder.is_bound());
    assert_eq!(
        node.binder.operations().last(),
        Some(&BinderOp::Del("192.168.1.100/24".into()))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn priority_decides_and_survivor_takes_over() {
    let port_a = free_udp_port();
    let port_b = free_udp_port();

    let node_a = node(node_config(
        "node-a",
        10,
        port_a,
        vec![format!("127.0.0.1:{}", port_b)],
    ));
    let node_b = node(node_config(
        "node-b",
        20,
        port_b,
        vec![format!("127.0.0.1:{}", port_a)],
    ));

    let handle_a = node_a.supervisor.start().await.expect("start node-a");
    let handle_b = node_b.supervisor.start().await.expect("start node-b");

    tokio::time::sleep(Duration::from_millis(400)).await;

    // Lower priority value wins while both are alive.
    assert!(handle_a.is_leader());
    assert!(!handle_b.is_leader());
    assert_eq!(handle_a.vip_state().await, VipState::Assigned);
    assert_eq!(handle_b.vip_state().await, VipState::Released);
    assert_eq!(handle_b.current_leader().as_deref(), Some("node-a"));

    // Stop the leader; the survivor must bind within the staleness
    // window plus one election period.
    handle_a.shutdown().await.expect("stop node-a");
    assert!(!node_a.binder.is_bound());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(handle_b.is_leader());
    assert_eq!(handle_b.vip_state().await, VipState::Assigned);
    assert!(node_b.binder.is_bound());

    handle_b.shutdown().await.expect("stop node-b");
    assert!(!node_b.binder.is_bound());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_is_clean_with_an_unreachable_peer() {
    let port_a = free_udp_port();
    // The configured peer never answers; the node elects itself from its
    // own view and heartbeat send failures stay non-fatal.
    let node_a = node(node_config(
        "node-b",
        20,
        port_a,
        vec!["127.0.0.1:1".into()],
    ));

    let handle = node_a.supervisor.start().await.expect("supervisor starts");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(handle.is_leader());

    handle.shutdown().await.expect("clean shutdown");
    assert!(!node_a.binder.is_bound());
}

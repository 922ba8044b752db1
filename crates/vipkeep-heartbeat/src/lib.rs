//! ---
//! vk_section: "03-heartbeat-membership"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "Heartbeat wire protocol and peer liveness tracking."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
//! Heartbeat transport: periodically advertises this node's
//! `(id, priority, healthy, k8s_mode)` to every configured peer over UDP
//! and maintains the table of last-seen peer records the election reads.

mod message;
mod peers;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use message::{decode, DecodedHeartbeat, HeartbeatMessage, LEGACY_PEER_PRIORITY};
pub use peers::{PeerRecord, PeerTable, PeerUpdate};

use vipkeep_common::AppConfig;

/// Socket read deadline; bounds how long shutdown can go unobserved.
pub const READ_TIMEOUT: Duration = Duration::from_millis(500);

const MAX_DATAGRAM: usize = 1024;

/// Connectionless heartbeat sender/receiver pair around a shared
/// [`PeerTable`]. Losses are tolerated; there is no acknowledgement and
/// no sequencing.
#[derive(Debug)]
pub struct HeartbeatTransport {
    node_id: String,
    priority: i32,
    k8s_mode: bool,
    peer_endpoints: Vec<String>,
    listen_port: u16,
    interval: Duration,
    health: watch::Receiver<bool>,
    peers: Arc<PeerTable>,
}

/// Join handles for the two transport tasks.
#[derive(Debug)]
pub struct HeartbeatTasks {
    sender: JoinHandle<()>,
    receiver: JoinHandle<()>,
}

impl HeartbeatTasks {
    pub async fn join(self) {
        if let Err(err) = self.sender.await {
            error!(error = %err, "heartbeat sender task join error");
        }
        if let Err(err) = self.receiver.await {
            error!(error = %err, "heartbeat receiver task join error");
        }
    }
}

impl HeartbeatTransport {
    /// `health` carries the debounced local readiness signal; a node
    /// without a probe passes a channel pinned to `true`.
    pub fn new(config: &AppConfig, health: watch::Receiver<bool>) -> Self {
        Self {
            node_id: config.node_id.clone(),
            priority: config.priority,
            k8s_mode: config.k8s.enabled,
            peer_endpoints: config.peers.clone(),
            listen_port: config.port,
            interval: config.heartbeat_interval,
            health,
            peers: Arc::new(PeerTable::new(config.heartbeat_timeout())),
        }
    }

    /// Shared handle to the peer table for the election evaluator.
    pub fn peer_table(&self) -> Arc<PeerTable> {
        self.peers.clone()
    }

    /// Fresh snapshot of non-stale peers; purges stale entries.
    pub fn live_peers(&self) -> HashMap<String, PeerRecord> {
        self.peers.live_peers(Instant::now())
    }

    /// Bind the sockets and spawn the sender and receiver tasks. Both
    /// observe `shutdown` within one read timeout or send interval.
    pub async fn start(&self, shutdown: &broadcast::Sender<()>) -> Result<HeartbeatTasks> {
        let receiver_socket = UdpSocket::bind(("0.0.0.0", self.listen_port))
            .await
            .with_context(|| format!("failed to bind heartbeat listener on port {}", self.listen_port))?;
        let sender_socket = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .context("failed to bind heartbeat sender socket")?;

        info!(
            node = %self.node_id,
            port = self.listen_port,
            peers = self.peer_endpoints.len(),
            "heartbeat transport started"
        );

        let receiver = self.spawn_receiver(receiver_socket, shutdown.subscribe());
        let sender = self.spawn_sender(sender_socket, shutdown.subscribe());
        Ok(HeartbeatTasks { sender, receiver })
    }

    fn spawn_sender(
        &self,
        socket: UdpSocket,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let node_id = self.node_id.clone();
        let priority = self.priority;
        let k8s_mode = self.k8s_mode;
        let endpoints = self.peer_endpoints.clone();
        let interval = self.interval;
        let health = self.health.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut last_sent_health: Option<bool> = None;
            let mut send_ok: HashMap<String, bool> = HashMap::new();
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!(node = %node_id, "heartbeat sender stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let healthy = *health.borrow();
                        if last_sent_health != Some(healthy) {
                            info!(
                                node = %node_id,
                                priority,
                                healthy,
                                k8s_mode,
                                "advertised health changed"
                            );
                            last_sent_health = Some(healthy);
                        }

                        let message = HeartbeatMessage {
                            node_id: node_id.clone(),
                            priority,
                            healthy,
                            k8s_mode,
                        };
                        let payload = match message.encode() {
                            Ok(payload) => payload,
                            Err(err) => {
                                warn!(node = %node_id, error = %err, "failed to encode heartbeat");
                                continue;
                            }
                        };

                        for endpoint in &endpoints {
                            let result = socket.send_to(&payload, endpoint.as_str()).await;
                            let previously_ok = send_ok.get(endpoint).copied().unwrap_or(true);
                            match result {
                                Ok(_) => {
                                    if !previously_ok {
                                        info!(node = %node_id, peer = %endpoint, "heartbeat send recovered");
                                    }
                                    send_ok.insert(endpoint.clone(), true);
                                }
                                Err(err) => {
                                    if previously_ok {
                                        warn!(node = %node_id, peer = %endpoint, error = %err, "heartbeat send failed");
                                    }
                                    send_ok.insert(endpoint.clone(), false);
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    fn spawn_receiver(
        &self,
        socket: UdpSocket,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let node_id = self.node_id.clone();
        let local_k8s_mode = self.k8s_mode;
        let peers = self.peers.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!(node = %node_id, "heartbeat receiver stopping");
                        break;
                    }
                    received = tokio::time::timeout(READ_TIMEOUT, socket.recv_from(&mut buf)) => {
                        let (len, _addr) = match received {
                            Err(_) => continue,
                            Ok(Err(err)) => {
                                warn!(node = %node_id, error = %err, "udp read error");
                                continue;
                            }
                            Ok(Ok(received)) => received,
                        };

                        let (peer_id, priority, healthy, k8s_mode) = match decode(&buf[..len]) {
                            DecodedHeartbeat::Message(message) => (
                                message.node_id,
                                message.priority,
                                message.healthy,
                                message.k8s_mode,
                            ),
                            // Older peers send just their node id; they are
                            // admitted with a weak claim and no probe gate.
                            DecodedHeartbeat::Legacy(peer_id) => {
                                (peer_id, LEGACY_PEER_PRIORITY, !local_k8s_mode, false)
                            }
                        };
                        if peer_id.is_empty() {
                            continue;
                        }

                        let update =
                            peers.observe(&peer_id, priority, healthy, k8s_mode, Instant::now());
                        match update {
                            PeerUpdate::Discovered => {
                                info!(
                                    node = %node_id,
                                    peer = %peer_id,
                                    priority,
                                    healthy,
                                    k8s_mode,
                                    "peer discovered"
                                );
                            }
                            PeerUpdate::HealthChanged { from, to } => {
                                info!(
                                    node = %node_id,
                                    peer = %peer_id,
                                    from,
                                    to,
                                    priority,
                                    "peer health changed"
                                );
                            }
                            PeerUpdate::Refreshed => {}
                        }
                    }
                }
            }
        })
    }
}

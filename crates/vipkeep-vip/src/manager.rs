//! ---
//! vk_section: "05-vip-binding"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "VIP interface binding and layer-2 announcements."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vipkeep_common::AppConfig;
use vipkeep_metrics::ClusterMetrics;

use crate::announce::L2Announcer;
use crate::binder::InterfaceBinder;

/// Backstop cadence before the first tick settles the loop into steady
/// polling.
const BASE_POLL: Duration = Duration::from_millis(500);
/// One-shot accelerated cycle after a leadership event.
const FAST_POLL: Duration = Duration::from_millis(200);
/// Steady-state backstop against missed events.
const STEADY_POLL: Duration = Duration::from_secs(1);

/// Ownership state of the configured address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VipState {
    Released,
    Assigned,
}

/// Ground truth the manager re-queries after every wakeup. The election
/// evaluator implements this; tests substitute a flag.
pub trait LeadershipView: Send + Sync {
    fn is_leader(&self) -> bool;
}

#[derive(Debug)]
struct ManagerState {
    state: VipState,
    add_warned: bool,
    del_warned: bool,
}

/// Reconciles [`VipState`] with the election's answer and drives the
/// interface binder and layer-2 announcer.
///
/// The state lock is held across the OS call, serialising add against
/// del; state only advances when the OS effect succeeded, so `Assigned`
/// always implies the address is actually bound.
pub struct VipManager {
    vip: String,
    vip_addr: Ipv4Addr,
    interface: String,
    state: Mutex<ManagerState>,
    binder: Arc<dyn InterfaceBinder>,
    announcer: Arc<dyn L2Announcer>,
    metrics: Option<ClusterMetrics>,
}

impl VipManager {
    pub fn new(
        config: &AppConfig,
        binder: Arc<dyn InterfaceBinder>,
        announcer: Arc<dyn L2Announcer>,
        metrics: Option<ClusterMetrics>,
    ) -> Result<Self> {
        let vip_addr = config.vip_ipv4()?;
        Ok(Self {
            vip: config.vip.clone(),
            vip_addr,
            interface: config.interface.clone(),
            state: Mutex::new(ManagerState {
                state: VipState::Released,
                add_warned: false,
                del_warned: false,
            }),
            binder,
            announcer,
            metrics,
        })
    }

    pub async fn state(&self) -> VipState {
        self.state.lock().await.state
    }

    /// Align the VIP with the desired ownership. Idempotent at the state
    /// level: entering the current state issues no OS call.
    pub async fn reconcile(&self, should_hold: bool) {
        let mut inner = self.state.lock().await;
        match (should_hold, inner.state) {
            (true, VipState::Released) => match self.binder.add(&self.vip, &self.interface).await {
                Ok(()) => {
                    inner.state = VipState::Assigned;
                    inner.add_warned = false;
                    info!(vip = %self.vip, interface = %self.interface, "VIP assigned");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_vip_transition("add");
                    }
                    self.dispatch_announcer();
                }
                Err(err) => {
                    if inner.add_warned {
                        debug!(vip = %self.vip, error = %err, "VIP assignment still failing");
                    } else {
                        warn!(vip = %self.vip, interface = %self.interface, error = %err, "failed to assign VIP; will retry");
                        inner.add_warned = true;
                    }
                }
            },
            (false, VipState::Assigned) => {
                match self.binder.del(&self.vip, &self.interface).await {
                    Ok(()) => {
                        inner.state = VipState::Released;
                        inner.del_warned = false;
                        info!(vip = %self.vip, interface = %self.interface, "VIP released");
                        if let Some(metrics) = &self.metrics {
                            metrics.record_vip_transition("del");
                        }
                    }
                    Err(err) => {
                        if inner.del_warned {
                            debug!(vip = %self.vip, error = %err, "VIP release still failing");
                        } else {
                            warn!(vip = %self.vip, interface = %self.interface, error = %err, "failed to release VIP; will retry");
                            inner.del_warned = true;
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// Final release on shutdown.
    pub async fn release_now(&self) {
        if self.state().await == VipState::Assigned {
            info!(vip = %self.vip, "releasing VIP for shutdown");
        }
        self.reconcile(false).await;
    }

    /// The announcement runs on its own task: it is best-effort and a
    /// completed bind must not wait on it or be rolled back by it.
    fn dispatch_announcer(&self) {
        let announcer = self.announcer.clone();
        let vip = self.vip_addr;
        let interface = self.interface.clone();
        tokio::spawn(async move {
            if let Err(err) = announcer.announce(vip, &interface).await {
                warn!(vip = %vip, interface = %interface, error = %err, "layer-2 announcement failed");
            }
        });
    }

    /// Monitor loop: reacts to leadership events immediately, then keeps
    /// polling as a backstop. Each event buys exactly one accelerated
    /// cycle before the cadence reverts to steady polling.
    pub fn start(
        self: Arc<Self>,
        view: Arc<dyn LeadershipView>,
        mut leader_rx: watch::Receiver<Option<String>>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(vip = %self.vip, interface = %self.interface, "VIP manager started");
            self.reconcile(view.is_leader()).await;

            let mut poll = BASE_POLL;
            let mut fast_check = false;
            let mut stream_closed = false;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!(vip = %self.vip, "VIP manager stopping");
                        break;
                    }
                    changed = leader_rx.changed(), if !stream_closed => {
                        match changed {
                            Ok(()) => {
                                let leader = leader_rx.borrow_and_update().clone();
                                info!(
                                    vip = %self.vip,
                                    leader = leader.as_deref().unwrap_or("<none>"),
                                    "leadership change observed"
                                );
                                self.reconcile(view.is_leader()).await;
                                fast_check = true;
                            }
                            Err(_) => {
                                stream_closed = true;
                            }
                        }
                    }
                    _ = tokio::time::sleep(poll) => {
                        poll = if fast_check {
                            fast_check = false;
                            FAST_POLL
                        } else {
                            STEADY_POLL
                        };
                        self.reconcile(view.is_leader()).await;
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for VipManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VipManager")
            .field("vip", &self.vip)
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

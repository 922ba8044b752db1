//! ---
//! vk_section: "05-vip-binding"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "VIP interface binding and layer-2 announcements."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;
use tracing::debug;

/// Capability that adds and removes the VIP on a local interface.
///
/// The manager owns the state machine; implementations only perform the
/// OS effect and report whether it took.
#[async_trait]
pub trait InterfaceBinder: Send + Sync {
    async fn add(&self, vip: &str, interface: &str) -> Result<()>;
    async fn del(&self, vip: &str, interface: &str) -> Result<()>;
}

/// Production binder shelling out to `ip addr`.
#[derive(Debug, Default)]
pub struct IpCommandBinder;

#[async_trait]
impl InterfaceBinder for IpCommandBinder {
    async fn add(&self, vip: &str, interface: &str) -> Result<()> {
        run_ip(&["addr", "add", vip, "dev", interface]).await
    }

    async fn del(&self, vip: &str, interface: &str) -> Result<()> {
        run_ip(&["addr", "del", vip, "dev", interface]).await
    }
}

async fn run_ip(args: &[&str]) -> Result<()> {
    debug!(?args, "invoking ip");
    let output = Command::new("ip")
        .args(args)
        .output()
        .await
        .map_err(|err| anyhow!("failed to spawn ip {:?}: {}", args, err))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(anyhow!(
            "ip {:?} exited with {}: {}",
            args,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

/// One OS effect observed by the in-memory binder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinderOp {
    Add(String),
    Del(String),
}

/// In-memory recorder standing in for the kernel in tests.
#[derive(Debug, Default)]
pub struct MemoryBinder {
    ops: Mutex<Vec<BinderOp>>,
    bound: AtomicBool,
    fail_add: AtomicBool,
    fail_del: AtomicBool,
}

impl MemoryBinder {
    pub fn operations(&self) -> Vec<BinderOp> {
        self.ops.lock().clone()
    }

    /// Whether the last successful operation was an `add`.
    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::SeqCst)
    }

    pub fn set_fail_add(&self, fail: bool) {
        self.fail_add.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_del(&self, fail: bool) {
        self.fail_del.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl InterfaceBinder for MemoryBinder {
    async fn add(&self, vip: &str, _interface: &str) -> Result<()> {
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(anyhow!("injected add failure"));
        }
        self.ops.lock().push(BinderOp::Add(vip.to_owned()));
        self.bound.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn del(&self, vip: &str, _interface: &str) -> Result<()> {
        if self.fail_del.load(Ordering::SeqCst) {
            return Err(anyhow!("injected del failure"));
        }
        self.ops.lock().push(BinderOp::Del(vip.to_owned()));
        self.bound.store(false, Ordering::SeqCst);
        Ok(())
    }
}

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
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Capability that announces the VIP's new MAC binding at layer 2 so
/// switches and neighbors re-learn promptly. Strictly best-effort: the
/// caller never rolls back a bind because an announcement failed.
#[async_trait]
pub trait L2Announcer: Send + Sync {
    async fn announce(&self, vip: Ipv4Addr, interface: &str) -> Result<()>;
}

/// Announcer built on the platform tools.
///
/// A privileged process tries gratuitous ARP via `arping` first and falls
/// back to the neighbor table, then to echo-provoked ARP learning. An
/// unprivileged process goes straight to the echo fallback, which needs
/// no capabilities at all.
#[derive(Debug)]
pub struct ToolAnnouncer {
    privileged: bool,
}

impl ToolAnnouncer {
    /// Detect privileges once at construction.
    pub fn detect() -> Self {
        // SAFETY: geteuid is always safe to call.
        let euid = unsafe { libc::geteuid() };
        let privileged = euid == 0;
        if privileged {
            info!("running as root; gratuitous ARP via arping available");
        } else {
            info!(euid, "running unprivileged; using echo-based ARP refresh");
        }
        Self { privileged }
    }

    #[cfg(test)]
    fn with_privilege(privileged: bool) -> Self {
        Self { privileged }
    }

    async fn try_arping(&self, vip: &str, interface: &str) -> bool {
        // Announce flag, unsolicited flag, plain send: first success wins.
        for args in [
            vec!["-A", "-c", "3", "-I", interface, vip],
            vec!["-U", "-c", "3", "-I", interface, vip],
            vec!["-c", "1", "-I", interface, vip],
        ] {
            if run_tool("arping", &args).await {
                debug!(vip, interface, ?args, "gratuitous ARP sent via arping");
                return true;
            }
        }

        // Insert-and-delete on the neighbor table can still announce when
        // arping is unavailable but CAP_NET_ADMIN is held.
        if run_tool(
            "ip",
            &[
                "neigh",
                "add",
                vip,
                "lladdr",
                "00:00:00:00:00:00",
                "dev",
                interface,
            ],
        )
        .await
        {
            run_tool("ip", &["neigh", "del", vip, "dev", interface]).await;
            debug!(vip, interface, "neighbor-table announcement sent");
            return true;
        }
        false
    }

    /// Echoes provoke ARP traffic from this host, refreshing neighbor
    /// caches without any privileges.
    async fn echo_fallback(&self, vip: Ipv4Addr, interface: &str) {
        let vip_literal = vip.to_string();
        if run_tool("ping", &["-c", "1", "-W", "1", vip_literal.as_str()]).await {
            debug!(vip = %vip_literal, "self-echo sent to establish ARP entry");
        }

        match interface_ipv4(interface).await {
            Ok((address, prefix)) => {
                let broadcast = directed_broadcast(address, prefix).to_string();
                if run_tool(
                    "ping",
                    &["-c", "1", "-W", "1", "-I", interface, broadcast.as_str()],
                )
                .await
                {
                    debug!(vip = %vip_literal, broadcast = %broadcast, "directed-broadcast echo sent");
                }
                for gateway in conventional_gateways(address, prefix) {
                    let gateway = gateway.to_string();
                    if run_tool(
                        "ping",
                        &["-c", "1", "-W", "1", "-I", interface, gateway.as_str()],
                    )
                    .await
                    {
                        debug!(vip = %vip_literal, gateway = %gateway, "gateway echo sent");
                    }
                }
            }
            Err(err) => {
                warn!(interface, error = %err, "unable to derive subnet for echo fallback");
            }
        }
    }
}

#[async_trait]
impl L2Announcer for ToolAnnouncer {
    async fn announce(&self, vip: Ipv4Addr, interface: &str) -> Result<()> {
        let vip_literal = vip.to_string();
        info!(vip = %vip_literal, interface, "announcing VIP at layer 2");

        if !self.privileged {
            self.echo_fallback(vip, interface).await;
            return Ok(());
        }
        if self.try_arping(&vip_literal, interface).await {
            return Ok(());
        }
        self.echo_fallback(vip, interface).await;
        Ok(())
    }
}

/// In-memory recorder standing in for the network in tests.
#[derive(Debug, Default)]
pub struct MemoryAnnouncer {
    announcements: AtomicUsize,
    fail: std::sync::atomic::AtomicBool,
}

impl MemoryAnnouncer {
    pub fn announcements(&self) -> usize {
        self.announcements.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl L2Announcer for MemoryAnnouncer {
    async fn announce(&self, _vip: Ipv4Addr, _interface: &str) -> Result<()> {
        self.announcements.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err(anyhow!("injected announcer failure"))
        } else {
            Ok(())
        }
    }
}

async fn run_tool(program: &str, args: &[&str]) -> bool {
    match Command::new(program).args(args).output().await {
        Ok(output) => output.status.success(),
        Err(err) => {
            debug!(program, ?args, error = %err, "tool invocation failed");
            false
        }
    }
}

/// First IPv4 address and prefix configured on the interface, read from
/// `ip -o -4 addr show`.
async fn interface_ipv4(interface: &str) -> Result<(Ipv4Addr, u8)> {
    let output = Command::new("ip")
        .args(["-o", "-4", "addr", "show", "dev", interface])
        .output()
        .await
        .map_err(|err| anyhow!("failed to spawn ip addr show: {}", err))?;
    if !output.status.success() {
        return Err(anyhow!(
            "ip addr show dev {} exited with {}",
            interface,
            output.status
        ));
    }
    parse_inet_line(&String::from_utf8_lossy(&output.stdout))
        .ok_or_else(|| anyhow!("no IPv4 address configured on {}", interface))
}

/// Pull the first `inet a.b.c.d/len` pair out of `ip -o -4` output.
fn parse_inet_line(output: &str) -> Option<(Ipv4Addr, u8)> {
    for line in output.lines() {
        let mut tokens = line.split_whitespace();
        while let Some(token) = tokens.next() {
            if token != "inet" {
                continue;
            }
            let cidr = tokens.next()?;
            let (addr, prefix) = cidr.split_once('/')?;
            let addr = addr.parse::<Ipv4Addr>().ok()?;
            let prefix = prefix.parse::<u8>().ok().filter(|len| *len <= 32)?;
            return Some((addr, prefix));
        }
    }
    None
}

fn subnet_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

/// Directed broadcast of the subnet holding `address`.
fn directed_broadcast(address: Ipv4Addr, prefix: u8) -> Ipv4Addr {
    let mask = subnet_mask(prefix);
    Ipv4Addr::from((u32::from(address) & mask) | !mask)
}

/// Conventional gateway addresses (`.1` and `.254` on the network's last
/// octet) that actually fall inside the subnet.
fn conventional_gateways(address: Ipv4Addr, prefix: u8) -> Vec<Ipv4Addr> {
    let mask = subnet_mask(prefix);
    let network = u32::from(address) & mask;
    let mut gateways = Vec::new();
    for last_octet in [1u32, 254u32] {
        let candidate = (network & 0xffff_ff00) | last_octet;
        if candidate & mask == network {
            gateways.push(Ipv4Addr::from(candidate));
        }
    }
    gateways
}

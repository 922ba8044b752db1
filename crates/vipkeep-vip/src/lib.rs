//! ---
//! vk_section: "05-vip-binding"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "VIP interface binding and layer-2 announcements."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
//! VIP binder: consumes leadership changes and reconciles the address
//! binding on the configured interface, announcing acquisitions at
//! layer 2. The OS effects sit behind injectable capabilities so tests
//! run against in-memory recorders.

mod announce;
mod binder;
mod manager;

pub use announce::{L2Announcer, MemoryAnnouncer, ToolAnnouncer};
pub use binder::{BinderOp, InterfaceBinder, IpCommandBinder, MemoryBinder};
pub use manager::{LeadershipView, VipManager, VipState};

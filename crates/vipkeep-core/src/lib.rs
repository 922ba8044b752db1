//! ---
//! vk_section: "01-core-runtime"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "Component wiring and lifecycle supervision."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
//! Supervisor crate: wires the readiness prober, heartbeat transport,
//! election evaluator, and VIP manager into one lifecycle and owns their
//! ordered shutdown.

pub mod supervisor;

pub use supervisor::{Supervisor, SupervisorHandle};

//! ---
//! vk_section: "01-core-runtime"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "Shared configuration, logging, and version primitives."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
//! Shared primitives for the vipkeep workspace: configuration loading,
//! tracing bootstrap, and version metadata consumed by every crate.

pub mod config;
pub mod logging;
pub mod version;

pub use config::{
    AppConfig, ConfigError, K8sConfig, LoadedAppConfig, LoggingConfig, MetricsConfig,
};
pub use logging::{init_tracing, LogFormat, LogGuards};
pub use version::{BuildInfo, BUILD};

//! ---
//! vk_section: "01-core-runtime"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "Shared configuration, logging, and version primitives."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::logging::LogFormat;

/// Placeholder shipped in the example configuration; the probe must never
/// be pointed at it.
pub const API_SERVER_SENTINEL: &str = "https://YOUR-API-SERVER:6443";

fn default_priority() -> i32 {
    100
}

fn default_port() -> u16 {
    9888
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_election_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    "0.0.0.0:9798"
        .parse()
        .expect("valid default metrics address")
}

/// Primary configuration object for a vipkeep node.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Cluster-unique identity of this node.
    pub node_id: String,
    /// Election tiebreak; lower value wins.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Interface the VIP is bound on and announced from.
    pub interface: String,
    /// IPv4 literal with optional `/prefix` handed to the interface binder.
    pub vip: String,
    /// `host:port` heartbeat destinations for every other cluster member.
    #[serde(default)]
    pub peers: Vec<String>,
    /// UDP listen port for incoming heartbeats.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_heartbeat_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub heartbeat_interval: Duration,
    #[serde(default = "default_election_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub election_timeout: Duration,
    /// Reserved for heartbeat transport protection; unused by the core loop.
    #[serde(default)]
    pub tls_cert: Option<PathBuf>,
    #[serde(default)]
    pub tls_key: Option<PathBuf>,
    #[serde(default)]
    pub k8s: K8sConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Readiness-probe settings. When `enabled` is false the node always
/// advertises itself healthy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct K8sConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Probe base URL, e.g. `https://10.0.0.10:6443`.
    #[serde(default)]
    pub api_server: String,
    /// Bearer token for the `/readyz` request.
    #[serde(default)]
    pub token: String,
    /// PEM bundle trusted for probe TLS. Without it certificate
    /// verification is disabled.
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    /// Use the in-environment service-account token and CA instead of the
    /// fields above.
    #[serde(default)]
    pub in_cluster: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// When set, a daily-rolling JSON log file is kept here in addition
    /// to stdout.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

/// Errors surfaced while loading or validating configuration. All of them
/// are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read configuration file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("no configuration file found; inspected: {candidates}")]
    NotFound { candidates: String },
    #[error("configuration validation failed:\n{details}")]
    Validation { details: String },
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "VIPKEEP_CONFIG";

    /// Load configuration from disk, respecting the `VIPKEEP_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self, ConfigError> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(
        candidates: &[P],
    ) -> Result<LoadedAppConfig, ConfigError> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(ConfigError::NotFound {
            candidates: candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    fn from_path(path: &Path) -> Result<Self, ConfigError> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AppConfig =
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// The VIP without its prefix suffix.
    pub fn vip_ipv4(&self) -> Result<Ipv4Addr, ConfigError> {
        let literal = self.vip.split('/').next().unwrap_or_default();
        literal.parse().map_err(|_| ConfigError::Validation {
            details: format!("vip '{}' is not an IPv4 literal", self.vip),
        })
    }

    /// Records older than this are stale and excluded from election.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval * 2
    }

    /// Validate structural invariants. Collects every problem so the
    /// operator sees the full list in one pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.node_id.trim().is_empty() {
            errors.push("node_id must not be empty".to_owned());
        }
        if self.interface.trim().is_empty() {
            errors.push("interface must not be empty".to_owned());
        }
        match self.vip.split('/').collect::<Vec<_>>()[..] {
            [addr] => {
                if addr.parse::<Ipv4Addr>().is_err() {
                    errors.push(format!("vip '{}' is not an IPv4 literal", self.vip));
                }
            }
            [addr, prefix] => {
                if addr.parse::<Ipv4Addr>().is_err() {
                    errors.push(format!("vip '{}' is not an IPv4 literal", self.vip));
                }
                match prefix.parse::<u8>() {
                    Ok(len) if len <= 32 => {}
                    _ => errors.push(format!("vip prefix '{}' must be 0..=32", prefix)),
                }
            }
            _ => errors.push(format!("vip '{}' is not an IPv4 literal", self.vip)),
        }
        for peer in &self.peers {
            let valid = peer
                .rsplit_once(':')
                .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
                .unwrap_or(false);
            if !valid {
                errors.push(format!("peer '{}' is not a host:port endpoint", peer));
            }
        }
        if self.port == 0 {
            errors.push("port must be non-zero".to_owned());
        }
        if self.heartbeat_interval.is_zero() {
            errors.push("heartbeat_interval must be at least one second".to_owned());
        }
        if self.election_timeout.is_zero() {
            errors.push("election_timeout must be at least one second".to_owned());
        }
        if self.k8s.enabled && !self.k8s.in_cluster {
            if self.k8s.api_server.trim().is_empty() {
                errors.push("k8s.api_server must be set when the probe is enabled".to_owned());
            } else if self.k8s.api_server == API_SERVER_SENTINEL {
                errors.push(format!(
                    "k8s.api_server still carries the placeholder '{}'",
                    API_SERVER_SENTINEL
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation {
                details: errors.join("\n"),
            })
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = ConfigError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let config: AppConfig =
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }
}

/// Compute the SHA-256 hash of a validated [`AppConfig`], logged at
/// startup so operators can tell nodes with divergent configs apart.
pub fn hash_config(config: &AppConfig) -> Result<String, ConfigError> {
    let serialised = serde_yaml::to_string(config).map_err(|source| ConfigError::Parse {
        path: PathBuf::from("<memory>"),
        source,
    })?;
    let mut hasher = Sha256::new();
    hasher.update(serialised.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

//! ---
//! vk_section: "01-core-runtime"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "Shared configuration, logging, and version primitives."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "VIPKEEP_LOG";
const DEFAULT_FILE_PREFIX: &str = "vipkeepd";

/// Available log formats for the stdout sink.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Writer guards for the non-blocking sinks. Dropping them flushes and
/// stops the writer threads, so the caller keeps them alive until exit.
pub struct LogGuards {
    _stdout: WorkerGuard,
    _file: Option<WorkerGuard>,
}

/// Install the tracing subscriber.
///
/// Stdout is the primary sink; under a supervisor or in a container that
/// is all the daemon needs, so the daily-rolling JSON file is created
/// only when `logging.directory` is configured. Every sink stamps RFC
/// 3339 UTC times: failover analysis lines up log lines from different
/// nodes, which local or unstamped clocks would break.
pub fn init_tracing(config: &LoggingConfig) -> Result<LogGuards> {
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_timer(UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let mut file_guard = None;
    let file_layer = match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory).with_context(|| {
                format!("unable to create log directory {}", directory.display())
            })?;
            let prefix = config
                .file_prefix
                .as_deref()
                .unwrap_or(DEFAULT_FILE_PREFIX);
            let appender =
                tracing_appender::rolling::daily(directory, format!("{}.log", prefix));
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            file_guard = Some(guard);
            Some(
                fmt::layer()
                    .with_timer(UtcTime::rfc_3339())
                    .json()
                    .with_writer(file_writer)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(
        format = ?config.format,
        file_logging = config.directory.is_some(),
        "tracing initialised"
    );
    Ok(LogGuards {
        _stdout: stdout_guard,
        _file: file_guard,
    })
}

/// `VIPKEEP_LOG` wins over `RUST_LOG`; without either the daemon logs at
/// `info`.
fn env_filter() -> EnvFilter {
    if let Ok(directive) = std::env::var(LOG_ENV) {
        match EnvFilter::try_new(&directive) {
            Ok(filter) => return filter,
            Err(err) => {
                eprintln!("invalid {} directive ({}); falling back", LOG_ENV, err);
            }
        }
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

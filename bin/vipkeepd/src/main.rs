//! ---
//! vk_section: "01-core-runtime"
//! vk_subsection: "binary"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "Binary entrypoint for the vipkeep daemon."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tracing::{info, warn};
use vipkeep_common::config::hash_config;
use vipkeep_common::logging::init_tracing;
use vipkeep_common::version::BUILD;
use vipkeep_common::AppConfig;
use vipkeep_core::Supervisor;
use vipkeep_metrics::{new_registry, ClusterMetrics, MetricsExporter};

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "vipkeep high-availability VIP failover daemon",
    long_about = None
)]
struct Cli {
    #[arg(
        long,
        value_name = "FILE",
        default_value = "config.yaml",
        help = "Path to configuration file"
    )]
    config: PathBuf,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print version information and exit"
    )]
    version: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", BUILD.summary());
        return Ok(());
    }

    let loaded = AppConfig::load_with_source(&[cli.config]).context("configuration error")?;
    let config = loaded.config;
    let config_hash = hash_config(&config)?;

    let _log_guards = init_tracing(&config.logging)?;
    info!(
        version = BUILD.semver,
        commit = BUILD.commit,
        node = %config.node_id,
        "starting vipkeep"
    );
    info!(
        config_path = %loaded.source.display(),
        config_hash = %config_hash,
        "configuration loaded"
    );

    let mut metrics = None;
    let mut exporter = None;
    if config.metrics.enabled {
        let registry = new_registry();
        let cluster = ClusterMetrics::new(registry.clone())?;
        cluster.set_build_info(BUILD.semver, BUILD.commit);
        match MetricsExporter::bind(registry, config.metrics.listen).await {
            Ok(server) => exporter = Some(server),
            Err(err) => {
                warn!(error = %err, "failed to start metrics exporter; continuing without it");
            }
        }
        metrics = Some(cluster);
    } else {
        info!("metrics exporter disabled by configuration");
    }

    let supervisor = Supervisor::new(config, metrics);
    let handle = supervisor.start().await?;

    info!(node = %handle.config().node_id, "daemon running; waiting for termination signal");
    wait_for_termination().await?;
    info!("termination signal received; shutting down");

    handle.shutdown().await?;
    if let Some(exporter) = exporter {
        exporter.stop().await?;
    }

    Ok(())
}

async fn wait_for_termination() -> Result<()> {
    let mut sigterm =
        unix_signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("SIGINT received");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received");
        }
    }
    Ok(())
}

//! dbaasd — the DBaaS daemon.
//!
//! Single binary that assembles the control plane:
//! - State store (redb)
//! - Adapter client (HTTP probe)
//! - Routing, registry and blue-green components
//! - REST API
//!
//! # Usage
//!
//! ```text
//! dbaasd serve --config /etc/dbaas/dbaasd.toml --port 8080
//! dbaasd config --config /etc/dbaas/dbaasd.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use dbaas_core::DaemonConfig;
use dbaas_registry::HttpAdapterClient;

#[derive(Parser)]
#[command(name = "dbaasd", about = "DBaaS daemon")]
struct Cli {
    /// Path to dbaasd.toml. Every setting has a default when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server.
    Serve {
        /// Port to listen on.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Role migration portion size.
        #[arg(long)]
        portion_size: Option<usize>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        json_logs: bool,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            portion_size,
            json_logs,
        } => {
            let config = apply_overrides(config, port, data_dir, portion_size);
            init_tracing(&config, json_logs);
            serve(config).await
        }
        Command::Config => {
            print!("{}", config.resolved().to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<DaemonConfig> {
    match path {
        Some(path) => DaemonConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(DaemonConfig::default()),
    }
}

/// CLI flags win over the config file.
fn apply_overrides(
    mut config: DaemonConfig,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    portion_size: Option<usize>,
) -> DaemonConfig {
    let server = config.server.get_or_insert_with(Default::default);
    if port.is_some() {
        server.port = port;
    }
    if data_dir.is_some() {
        server.data_dir = data_dir;
    }
    if portion_size.is_some() {
        config
            .migration
            .get_or_insert_with(Default::default)
            .portion_size = portion_size;
    }
    config
}

fn init_tracing(config: &DaemonConfig, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(config.log_filter()))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(dbaas_core::config::DEFAULT_LOG_FILTER));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(config: DaemonConfig) -> anyhow::Result<()> {
    info!("DBaaS daemon starting");

    // Ensure data directory exists.
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
    let db_path = data_dir.join("dbaas.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = dbaas_state::StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let adapter = Arc::new(HttpAdapterClient::new(&config.probe_path(), config.probe_timeout()));
    info!(
        probe_path = %config.probe_path(),
        timeout_ms = config.probe_timeout().as_millis() as u64,
        "adapter client initialized"
    );

    let state = dbaas_api::ApiState::new(store, adapter, config.portion_size());
    info!(portion_size = config.portion_size(), "routing and registry initialized");

    // ── Start API server ───────────────────────────────────────

    let router = dbaas_api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port()));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                return;
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("DBaaS daemon stopped");
    Ok(())
}

//! tablegridd: the tablegrid daemon.
//!
//! Single binary that assembles:
//! - Pipeline store (redb)
//! - Pipeline lifecycle and readiness coordinator
//! - Reconcile worker
//! - REST API
//!
//! # Usage
//!
//! ```text
//! tablegridd --config /etc/tablegrid/tablegrid.toml --data-dir /var/lib/tablegrid
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tablegrid_flows::{FlowTransport, HttpFlowTransport, MemoryTransport};
use tablegrid_state::PipelineStore;
use tablegridd::{assemble, DaemonConfig};

const DEFAULT_LOG_FILTER: &str = "info,tablegridd=debug,tablegrid=debug";

#[derive(Parser)]
#[command(name = "tablegridd", about = "tablegrid daemon")]
struct Cli {
    /// Path to tablegrid.toml. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides `listen`).
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Data directory for persistent state (overrides `data_dir`).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// Reconcile against an in-memory flow table instead of the flow manager.
    #[arg(long)]
    dry_run: bool,
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = match &cli.config {
        Some(path) => DaemonConfig::from_file(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    run(config, cli.dry_run).await
}

async fn run(config: DaemonConfig, dry_run: bool) -> anyhow::Result<()> {
    info!("tablegrid daemon starting");

    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.db_path();
    let store = PipelineStore::open(&db_path)?;
    info!(path = ?db_path, "pipeline store opened");

    let transport: Arc<dyn FlowTransport> = if dry_run {
        warn!("dry run: flows are applied to an in-memory table only");
        Arc::new(MemoryTransport::new())
    } else {
        info!(url = %config.flow_manager.url, "using flow manager");
        Arc::new(HttpFlowTransport::new(config.flow_manager.clone()))
    };

    let daemon = assemble(&config, store, transport);
    let router = daemon.router();

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (state, worker) = daemon.spawn_worker(shutdown_rx);

    // Resume whatever transition was in flight before the last stop.
    state.control.announce_current().await?;

    // ── Start API server ───────────────────────────────────────

    info!(addr = %config.listen, "API server starting");
    let listener = tokio::net::TcpListener::bind(config.listen).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = worker.await;

    info!("tablegrid daemon stopped");
    Ok(())
}

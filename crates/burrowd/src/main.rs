//! burrowd — the burrow daemon.
//!
//! Serves the enclave REST API over a container backend.
//!
//! # Usage
//!
//! ```text
//! burrowd serve --port 7443 --data-dir /var/lib/burrow
//! burrowd serve --config burrow.toml --backend kubernetes
//! burrowd check
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;

use burrow_backend::{ContainerBackend, DockerCliBackend, KubectlBackend, MetricsBackend};
use burrow_core::config::{BackendKind, BurrowConfig};
use burrow_network::EnclaveManager;

#[derive(Parser)]
#[command(name = "burrowd", about = "Burrow enclave orchestrator daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Docker,
    Kubernetes,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "7443")]
        port: u16,

        /// Data directory for enclave artifacts.
        #[arg(long, default_value = "/var/lib/burrow")]
        data_dir: PathBuf,

        /// Path to a burrow.toml config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Container backend, overriding the config file.
        #[arg(long, value_enum)]
        backend: Option<BackendArg>,

        /// Enable network partitioning for new enclaves by default.
        #[arg(long)]
        partitioning: bool,
    },

    /// Probe the container backend and exit.
    Check {
        /// Path to a burrow.toml config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Container backend, overriding the config file.
        #[arg(long, value_enum)]
        backend: Option<BackendArg>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,burrowd=debug,burrow=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            port,
            data_dir,
            config,
            backend,
            partitioning,
        } => serve(port, data_dir, config, backend, partitioning).await,
        Command::Check { config, backend } => check(config, backend).await,
    }
}

fn load_config(
    path: Option<PathBuf>,
    backend_override: Option<BackendArg>,
    partitioning: bool,
) -> anyhow::Result<BurrowConfig> {
    let mut config = match path {
        Some(path) => BurrowConfig::from_file(&path)?,
        None => BurrowConfig::local_docker(),
    };
    if let Some(backend) = backend_override {
        config.backend.kind = match backend {
            BackendArg::Docker => BackendKind::Docker,
            BackendArg::Kubernetes => BackendKind::Kubernetes,
        };
    }
    if partitioning {
        config.enclave.partitioning_enabled = true;
    }
    Ok(config)
}

fn build_backend(config: &BurrowConfig) -> Arc<dyn ContainerBackend> {
    let inner: Arc<dyn ContainerBackend> = match config.backend.kind {
        BackendKind::Docker => Arc::new(DockerCliBackend::new()),
        BackendKind::Kubernetes => Arc::new(KubectlBackend::new()),
    };
    // Count every backend call, whichever implementation runs.
    Arc::new(MetricsBackend::new(inner))
}

async fn serve(
    port: u16,
    data_dir: PathBuf,
    config: Option<PathBuf>,
    backend_override: Option<BackendArg>,
    partitioning: bool,
) -> anyhow::Result<()> {
    info!("burrow daemon starting");
    let config = load_config(config, backend_override, partitioning)?;
    std::fs::create_dir_all(&data_dir)?;

    let backend = build_backend(&config);
    info!(kind = ?config.backend.kind, "container backend initialized");

    let cancel = CancellationToken::new();
    backend
        .check_ready(&cancel, config.backend.readiness_timeout())
        .await?;
    info!("container backend is ready");

    let stop_timeout = config.enclave.stop_timeout();
    let manager = Arc::new(EnclaveManager::new(backend, config, data_dir.clone()));
    info!(data_dir = %data_dir.display(), "enclave manager initialized");

    let router = burrow_api::build_router(manager, stop_timeout);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
            cancel.cancel();
        })
        .await?;

    info!("burrow daemon stopped");
    Ok(())
}

async fn check(
    config: Option<PathBuf>,
    backend_override: Option<BackendArg>,
) -> anyhow::Result<()> {
    let config = load_config(config, backend_override, false)?;
    let backend = build_backend(&config);
    let cancel = CancellationToken::new();

    let timeout = config.backend.readiness_timeout();
    match backend.check_ready(&cancel, timeout).await {
        Ok(()) => {
            println!("backend is ready");
            Ok(())
        }
        Err(err) => {
            anyhow::bail!("backend is not ready: {err}");
        }
    }
}

//! drudge-worker: polls the configured backend and serves the admin API.
//!
//! Routes:
//! - `POST /tasks/work?method=..&params=..` runs a method in-process
//! - `POST /tasks/enqueue?method=..&params=..` queues it on the backend
//! - `GET /health`, `GET /metrics`

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use drudge_core::config::load_dotenv;
use drudge_core::{BackendKind, Config, MessageCodec, WorkMethods};
use drudge_server::builtin::builtin_methods;
use drudge_server::startup::build_state;
use drudge_server::build_router;

// ── CLI ─────────────────────────────────────────────────────────────

/// Background work-queue worker with an adaptive poll pool.
#[derive(Parser, Debug)]
#[command(name = "drudge-worker", version, about)]
struct Cli {
    /// Backend to poll: local, sqs or pubsub. Overrides WORKER_BACKEND.
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Admin HTTP port. Overrides PORT.
    #[arg(long)]
    port: Option<u16>,

    /// Config profile, e.g. PROD reads PROD_SQS_QUEUE_NAME before SQS_QUEUE_NAME.
    #[arg(long, env = "DRUDGE_PROFILE", default_value = "")]
    profile: String,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::for_profile(&cli.profile);
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.validate()?;
    config.log_summary();

    let methods = WorkMethods::of(builtin_methods(MessageCodec::new()));
    let state = Arc::new(build_state(&config, methods));

    state.pool.start().await?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Admin server listening");

    let app = build_router(state.clone());
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = served {
        warn!(error = %e, "Admin server exited with error");
    }

    state.pool.stop().await;
    info!("drudge-worker exited cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}

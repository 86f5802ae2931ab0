//! `agentim-hub`: the multi-tenant message broker (§2, §6).
//!
//! Wires the Connection Registry, Token Verifier, Revocation Registry,
//! Permission Store, and Broker/Router into one axum server exposing
//! `/ws/client`, `/ws/gateway`, and `/health`. Telemetry setup follows the
//! teacher's `cli::init_telemetry` shape: an `EnvFilter` seeded from
//! `--log-level`/`RUST_LOG`, switching between JSON and human-readable
//! output on `--json-logs`.

mod outbound;
mod persistence;
mod server;
mod state;
mod ws;

use std::{net::SocketAddr, sync::Arc};

use agentim_auth::{RevocationRegistry, TokenVerifier};
use agentim_broker::{Broker, PermissionStore};
use agentim_registry::ConnectionRegistry;
use clap::Parser;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::{outbound::SocketOutbound, persistence::InMemoryPersistence, state::AppState};

#[derive(Debug, Parser)]
#[command(name = "agentim-hub", about = "AgentIM multi-tenant hub/broker server")]
struct Cli {
    /// Address to bind the WebSocket/HTTP server to; overrides config file.
    #[arg(long)]
    bind: Option<String>,

    /// Port to bind to; overrides config file.
    #[arg(long)]
    port: Option<u16>,

    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`). Overridden by `RUST_LOG`.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit structured JSON logs instead of human-readable ones.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Log every HTTP request/response at INFO (adds a `TraceLayer`).
    #[arg(long, default_value_t = true)]
    http_request_logs: bool,
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false).with_thread_ids(false).with_ansi(true))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let mut config = agentim_config::discover_and_load();
    if let Some(bind) = &cli.bind {
        config.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if config.token_secret_current.is_empty() {
        tracing::warn!(
            "no token_secret_current configured; access tokens will fail to verify until one is set"
        );
    }

    let revocation = Arc::new(RevocationRegistry::new(
        config.token_secret_current.clone(),
        // A concrete `SharedRevocationStore` backend (Redis or similar) is an
        // external-collaborator concern (§9); this process runs memory-only
        // and accepts the single-process limitation `RevocationRegistry::new`
        // already warns about on construction.
        None,
        config.access_token_ttl_secs,
    ));
    let verifier = Arc::new(TokenVerifier::new(
        config.token_secret_current.clone(),
        config.token_secret_previous.clone(),
        Arc::clone(&revocation),
    ));
    let registry = Arc::new(ConnectionRegistry::with_caps(agentim_registry::Caps {
        max_client_per_user: config.max_client_connections_per_user as usize,
        max_gateway_per_user: config.max_gateway_connections_per_user as usize,
        max_global: config.max_connections_global as usize,
    }));
    let permissions = Arc::new(PermissionStore::new());
    let persistence = Arc::new(InMemoryPersistence::new());
    let socket_outbound = Arc::new(SocketOutbound::new());

    let broker = Arc::new(Broker::new(
        Arc::clone(&registry),
        Arc::clone(&verifier),
        persistence,
        Arc::clone(&socket_outbound) as Arc<dyn agentim_broker::Outbound>,
        Arc::clone(&permissions),
    ));

    let state = AppState {
        broker,
        registry,
        outbound: socket_outbound,
        revocation: Arc::clone(&revocation),
        permissions: Arc::clone(&permissions),
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(Arc::clone(&revocation).run_sweeper(shutdown_rx.clone()));
    tokio::spawn(run_permission_sweeper(Arc::clone(&permissions), shutdown_rx));

    let app = server::build_router(state, cli.http_request_logs);

    let addr: SocketAddr = format!("{}:{}", config.bind, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "agentim-hub listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    Ok(())
}

/// Sweeps expired pending permissions (§4.7) on a fixed cadence until shutdown.
async fn run_permission_sweeper(store: Arc<PermissionStore>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let expired = store.sweep().await;
                if !expired.is_empty() {
                    tracing::debug!(count = expired.len(), "swept expired pending permissions");
                }
            },
            result = shutdown.changed() => if result.is_err() || *shutdown.borrow() { break },
        }
    }
}

async fn shutdown_signal(tx: tokio::sync::watch::Sender<bool>) {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(error) => {
                tracing::warn!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
    let _ = tx.send(true);
}

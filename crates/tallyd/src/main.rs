//! tallyd — the Tally metrics server.
//!
//! Assembles the server from its parts:
//! - Repository (in-memory live state)
//! - Snapshot backend (Postgres, JSON file, or none)
//! - Synchronizer (restore, periodic or write-through flush)
//! - HTTP API
//!
//! Shutdown order: stop accepting requests, let the server drain (bounded
//! by `--shutdown-timeout`), signal the synchronizer, wait for its final
//! save, then close the backend.
//!
//! # Usage
//!
//! ```text
//! tallyd -a :8080 -i 300 -f /tmp/metrics-db.json
//! ```

mod config;

use std::future::IntoFuture;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use tally_state::Repository;
use tally_sync::Synchronizer;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tallyd=debug,tally=debug")),
        )
        .init();

    let config = Config::parse();
    run(config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        address = %config.address,
        store_interval = config.store_interval,
        restore = config.restore,
        "tallyd starting"
    );

    // ── Persistence ────────────────────────────────────────────

    let backend = config.backend().context("failed to configure snapshot backend")?;
    info!(backend = backend.name(), "snapshot backend selected");

    let sync = Arc::new(Synchronizer::new(
        Repository::default(),
        backend,
        config.sync_policy(),
    ));

    let (sync_tx, sync_rx) = watch::channel(false);
    sync.start(sync_rx).await;

    // ── HTTP server ────────────────────────────────────────────

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %listener.local_addr()?, "API server listening");

    let (http_tx, mut http_rx) = watch::channel(false);
    let server = axum::serve(listener, tally_api::build_router(sync.clone()))
        .with_graceful_shutdown(async move {
            let _ = http_rx.wait_for(|stop| *stop).await;
        });
    let mut server = tokio::spawn(server.into_future());

    tokio::select! {
        res = &mut server => {
            // The server stopped on its own; still drain the synchronizer.
            match res {
                Ok(Ok(())) => warn!("API server exited unexpectedly"),
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            let _ = http_tx.send(true);
            match tokio::time::timeout(config.shutdown_timeout(), &mut server).await {
                Ok(Ok(Ok(()))) => info!("API server drained"),
                Ok(Ok(Err(e))) => error!(error = %e, "API server failed while draining"),
                Ok(Err(e)) => error!(error = %e, "API server task panicked"),
                Err(_) => {
                    warn!(timeout = ?config.shutdown_timeout(), "API server drain timed out");
                    server.abort();
                }
            }
        }
    }

    // ── Final flush ────────────────────────────────────────────

    let _ = sync_tx.send(true);
    sync.done().await;
    if let Err(e) = sync.close().await {
        warn!(error = %e, "backend close failed");
    }

    info!("tallyd stopped");
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

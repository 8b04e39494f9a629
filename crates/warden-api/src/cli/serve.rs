//! `warden serve`: the webhook and executor HTTP server.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use tokio_util::sync::CancellationToken;

use crate::http;
use crate::state::AppState;

pub async fn handle_serve(state: AppState, host: Option<String>, port: Option<u16>) -> Result<()> {
    let workflows_dir = Path::new(&state.config.server.workflows_dir);
    if workflows_dir.is_dir() {
        let registered = state.register_workflows(workflows_dir)?;
        tracing::info!(registered, dir = %workflows_dir.display(), "workflows registered");
    } else {
        tracing::warn!(dir = %workflows_dir.display(), "workflows directory not found, serving none");
    }

    let resumed = state.substrate.recover().await.context("failed to recover incomplete runs")?;
    if !resumed.is_empty() {
        tracing::info!(count = resumed.len(), "resumed incomplete runs");
    }
    if state.webhooks.is_none() {
        tracing::warn!("no signing secret configured, webhooks are disabled");
    }

    let host = host.unwrap_or_else(|| state.config.server.host.clone());
    let port = port.unwrap_or(state.config.server.port);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    println!(
        "  {} warden listening on {}",
        style("*").green().bold(),
        style(format!("http://{addr}")).cyan()
    );
    println!("  {}", style("Press Ctrl+C to stop").dim());

    let stop = CancellationToken::new();
    let evictor = tokio::spawn(evict_idle_buckets(state.clone(), stop.clone()));

    let router = http::router::build_router(state.clone());
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    stop.cancel();
    let _ = evictor.await;
    state.substrate.shutdown();
    println!("\n  Server stopped.");
    Ok(())
}

/// Drop rate-limit buckets idle for longer than the configured window.
async fn evict_idle_buckets(state: AppState, stop: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(state.config.rate_limit.window_secs.max(1)));
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {
                let evicted = state.limiter.evict_idle();
                if evicted > 0 {
                    tracing::debug!(evicted, "evicted idle rate-limit buckets");
                }
            }
        }
    }
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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
    tracing::info!("shutdown signal received");
}

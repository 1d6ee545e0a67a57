use anyhow::Context;
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

use portfolio_guard::config;
use portfolio_guard::core::AuditSink;
use portfolio_guard::routes;
use portfolio_guard::service::AbuseGuard;
use portfolio_guard::store;
use portfolio_guard::utils::{init_logging, GuardError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    init_logging();
    tracing::info!("Starting portfolio API...");

    // Load configuration
    let settings = config::load_config().map_err(GuardError::Config)?;
    tracing::info!(
        host = %settings.server.host,
        port = %settings.server.port,
        trust_proxy_hops = settings.server.trust_proxy_hops,
        "Configuration loaded"
    );

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .map_err(GuardError::from)?;

    let store = store::from_config(&settings.redis).await?;
    let (audit, audit_writer) = AuditSink::from_config(&settings.audit);

    let guard = Arc::new(AbuseGuard::new(store, &settings, audit));
    let app = routes::app(guard, &settings.server, Router::new(), Some(metrics));

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .with_context(|| "invalid server.host / server.port")?;
    tracing::info!(%addr, "Server listening");

    axum::Server::try_bind(&addr)
        .with_context(|| format!("failed to bind {addr}"))?
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router, and with it every audit sink handle, is gone; let the writer
    // drain what is queued.
    if let Some(writer) = audit_writer {
        if let Err(e) = writer.await {
            tracing::error!(error = %e, "Audit writer failed");
        }
    }

    tracing::info!("Portfolio API stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

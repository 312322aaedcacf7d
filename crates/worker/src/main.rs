use anyhow::{Context, Result};
use cancelflow_worker::{WorkerService, WorkerServiceConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine; the environment may already be set
    let _ = dotenvy::dotenv();

    // Configure via environment variables:
    // - RUST_LOG: Log filter (takes precedence)
    // - LOG_LEVEL: Level for the cancelflow crates (default: "info")
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(format!(
            "cancelflow_worker={log_level},cancelflow_durable={log_level},tower_http=info"
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("cancelflow-worker starting...");

    let config = WorkerServiceConfig::from_env();
    let service = WorkerService::start(config.clone()).context("Failed to start worker")?;

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.http_addr))?;
    tracing::info!(addr = %config.http_addr, "HTTP server listening");

    axum::serve(listener, service.router())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Received shutdown signal");
        })
        .await
        .context("Server error")?;

    if let Err(e) = service.shutdown().await {
        tracing::warn!(error = %e, "Worker did not drain cleanly");
    }

    tracing::info!("Worker shutdown complete");
    Ok(())
}

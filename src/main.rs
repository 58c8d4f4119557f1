use anyhow::Result;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use adreel::api;
use adreel::config::Config;
use adreel::logging::init_tracing;
use adreel::serving::AdService;
use adreel::storage;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;
    init_tracing(config.log_format);
    info!("Loaded configuration");

    // Initialize storage
    let storage =
        storage::connect(&config.database, config.serving.candidate_cache_ttl()).await?;
    info!("Database initialized successfully");

    info!(
        "Serving with estimated CTR {}, frequency cap {} per {}s",
        config.serving.estimated_ctr,
        config.serving.frequency_cap,
        config.serving.frequency_window_secs
    );
    let service = Arc::new(AdService::new(storage, config.serving.clone()));

    let app = api::create_api_router(service)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Ad server listening on http://{}", addr);
    info!("   - Ad requests at http://{}/api/v1/ad/request", addr);
    info!("   - Stats at http://{}/api/v1/stats/overview", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

use idempotent_responses::api::{create_router, AppState};
use idempotent_responses::config::Settings;
use idempotent_responses::idempotency::{IdempotencyInterceptor, RedisResponseStore, ResponseCache};
use idempotent_responses::observability::{init_logging, init_metrics, mask_sensitive, LogConfig};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;

    // Initialize logging
    init_logging(&LogConfig::from(&settings.application));
    info!("Configuration loaded");

    let metrics_handle = init_metrics()?;

    // Connect to Redis
    info!("Connecting to Redis at {}...", mask_sensitive(&settings.redis.url, 8));
    let store = RedisResponseStore::open(&settings.redis.url, settings.redis.key_prefix.clone())?;
    match store.ping().await {
        Ok(()) => info!("Redis connection established"),
        Err(e) => warn!(error = %e, "Redis unreachable at startup, relying on fallback policy"),
    }

    let policy = settings.idempotency.policy();
    info!(?policy, "Idempotency fallback policy configured");

    let interceptor = Arc::new(IdempotencyInterceptor::new(
        ResponseCache::new(Arc::new(store)),
        policy,
    ));
    let state = AppState::new(interceptor, settings.idempotency.max_body_bytes).with_metrics(metrics_handle);
    let app = create_router(state);

    let addr = format!("{}:{}", settings.application.host, settings.application.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}

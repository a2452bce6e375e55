use axum::{middleware::from_fn_with_state, routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    api::{
        handler::{get_status, health_check},
        StatusState,
    },
    error::{AppError, AppResult},
    middleware::{rate_limit_middleware, RateLimitLayer},
    reconcile::shutdown::ShutdownSignal,
};

const REQUESTS_PER_MINUTE: u32 = 100;

pub async fn create_app(state: StatusState) -> Router {
    info!("⚙️ Setting up status routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest("/api/v1", Router::new().route("/status", get(get_status)))
        .layer(from_fn_with_state(
            RateLimitLayer::per_minute(REQUESTS_PER_MINUTE),
            rate_limit_middleware,
        ))
        .layer(CorsLayer::very_permissive())
        // Add request tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ Status routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str, shutdown: ShutdownSignal) -> AppResult<()> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| AppError::Config(format!("cannot bind {}: {}", bind_address, e)))?;
    info!("🌐 Status server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.triggered().await })
        .await
        .map_err(|e| AppError::Internal(format!("status server failed: {}", e)))?;
    Ok(())
}

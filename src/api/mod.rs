pub mod handlers;
pub mod types;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::service::SubscriptionService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SubscriptionService>,
}

pub fn router(service: Arc<SubscriptionService>) -> Router {
    let state = Arc::new(AppState { service });

    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/batches", get(handlers::list_batches))
        .route("/api/v1/batches/{chain_id}", get(handlers::chain_batches))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn serve(service: Arc<SubscriptionService>, host: &str, port: u16) -> eyre::Result<()> {
    let app = router(service);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

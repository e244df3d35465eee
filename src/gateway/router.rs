//! HTTP router

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{ConnectInfo, Request, State},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use super::models::ModelCatalog;
use super::proxy::ProxyCore;

/// Shared application state
pub struct AppState {
    /// Forwarding unit for `/v1/*`
    pub proxy: ProxyCore,
    /// Models advertised on `/v1/models`
    pub models: ModelCatalog,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    // No compression layer: relayed bodies must stay byte-identical.
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/models", get(models_handler))
        .route("/v1/{*path}", any(proxy_handler))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /v1/models
async fn models_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let list = state.models.list();
    debug!(count = list.data.len(), "Sending models list");
    Json(list)
}

/// Any other /v1/* request goes upstream
async fn proxy_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    state.proxy.forward(request, client).await
}

pub mod cli;
pub mod config;
pub mod registry;
pub mod websocket;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::registry::Registry;
use crate::websocket::websocket_handler;

async fn health_check() -> &'static str {
    "ok"
}

/// Build the relay router over a shared registry. Exposed so integration
/// tests can serve the relay on an ephemeral port.
pub fn app(registry: Registry) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(websocket_handler))
        .with_state(registry)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve the relay on an already-bound listener.
pub async fn serve(
    listener: tokio::net::TcpListener,
    registry: Registry,
) -> std::io::Result<()> {
    axum::serve(listener, app(registry)).await
}

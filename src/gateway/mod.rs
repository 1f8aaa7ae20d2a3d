//! HTTP Gateway
//!
//! All routes live under `/api/v1`; every body uses the
//! [`types::ApiResponse`] envelope.

pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;


use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::service::Ledger;
use state::AppState;

/// Build the gateway router
pub fn build_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/accounts",
            post(handlers::create_account).get(handlers::list_accounts),
        )
        .route("/accounts/{id}", get(handlers::get_account))
        .route("/transfers", post(handlers::create_transfer));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .with_state(state)
}

/// Start HTTP Gateway server; returns after Ctrl-C once in-flight requests drain
pub async fn run_server(addr: &str, ledger: Arc<dyn Ledger>) -> std::io::Result<()> {
    let app = build_router(Arc::new(AppState::new(ledger)));

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Gateway listening");
    tracing::info!("API Docs: http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

// HTTP surface
// Upload, chat and session maintenance routes over the shared stores

pub mod errors;
pub mod handlers;
pub mod state;


use anyhow::Context;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use errors::ApiError;
pub use state::AppContext;

#[inline]
pub fn router(ctx: Arc<AppContext>) -> Router {
    let max_upload_bytes = ctx.config.server.max_upload_bytes;

    Router::new()
        .route("/upload", post(handlers::upload))
        .route("/upload/batch", post(handlers::upload_batch))
        .route("/chat", post(handlers::chat))
        .route("/ask", post(handlers::chat))
        .route(
            "/sessions/{id}",
            get(handlers::get_history).delete(handlers::clear_history),
        )
        .route("/sessions", delete(handlers::clear_all_history))
        .route("/rebuild", post(handlers::rebuild))
        .route("/status", get(handlers::status))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Serve until Ctrl-C
#[inline]
pub async fn serve(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let address = format!("{}:{}", ctx.config.server.host, ctx.config.server.port);
    let address: SocketAddr = address
        .parse()
        .with_context(|| format!("Invalid listen address: {}", address))?;

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("Listening on http://{}", address);

    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

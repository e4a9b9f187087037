//! Uptime endpoint for hosting platforms that ping the service to keep it
//! awake. Shares nothing with the relay.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{http::StatusCode, routing::get, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub const STATUS_TEXT: &str = "AI Assistant is Online!";

/// `GET /` is the only route.
pub fn router() -> Router {
    Router::new().route("/", get(health_check))
}

async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, STATUS_TEXT)
}

/// Bind on all interfaces and serve until the process exits.
pub async fn serve(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    serve_on(listener).await
}

pub async fn serve_on(listener: TcpListener) -> Result<()> {
    let addr = listener.local_addr().context("Listener has no local address")?;
    info!("Liveness responder listening on http://{}", addr);

    axum::serve(listener, router())
        .await
        .context("Liveness server error")?;

    Ok(())
}

/// Start the responder on its own task. A bind failure is logged and only
/// ends this task.
pub fn spawn(port: u16) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = serve(port).await {
            error!("Liveness responder stopped: {:#}", e);
        }
    })
}

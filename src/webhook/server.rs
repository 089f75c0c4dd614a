//! Embedded HTTP server for the webhook receiver.
//!
//! The service's sender retries deliveries that are not acknowledged
//! quickly, so handlers here do nothing beyond validate-and-enqueue.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use tokio::sync::{oneshot, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::dispatcher::{AckStatus, WebhookDispatcher};

/// Configuration for the webhook receiver.
#[derive(Debug, Clone)]
pub struct WebhookServerConfig {
    pub host: String,
    pub port: u16,
    /// Enable CORS for cross-origin requests.
    pub enable_cors: bool,
}

impl Default for WebhookServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            enable_cors: false,
        }
    }
}

impl WebhookServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            enable_cors: false,
        }
    }

    fn socket_addr(&self) -> Result<SocketAddr, std::io::Error> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    }
}

/// Handle for controlling a running webhook server.
pub struct WebhookServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    pub addr: SocketAddr,
    running: Arc<RwLock<bool>>,
}

impl WebhookServerHandle {
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Signal the server to shut down gracefully.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            tracing::info!("Stopping webhook server");
            let _ = tx.send(());
            *self.running.write().await = false;
        }
    }
}

/// Build the receiver router.
pub fn webhook_router(dispatcher: Arc<WebhookDispatcher>) -> Router {
    Router::new()
        .route("/webhooks/agent", post(receive_delivery))
        .route("/health", get(health_check))
        .with_state(dispatcher)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// Accept one delivery.
///
/// Always a success status: a non-2xx response would make the sender
/// redeliver malformed payloads indefinitely.
async fn receive_delivery(
    State(dispatcher): State<Arc<WebhookDispatcher>>,
    body: Bytes,
) -> Json<serde_json::Value> {
    let status = match dispatcher.handle_delivery(&body) {
        AckStatus::Accepted => "received",
        AckStatus::Rejected => "rejected",
    };
    Json(serde_json::json!({ "status": status }))
}

/// Start the webhook server.
pub async fn start_webhook_server(
    config: WebhookServerConfig,
    dispatcher: Arc<WebhookDispatcher>,
) -> Result<WebhookServerHandle, std::io::Error> {
    let addr = config.socket_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let running = Arc::new(RwLock::new(true));

    let mut app = webhook_router(dispatcher);
    app = app.layer(TraceLayer::new_for_http());
    if config.enable_cors {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("Webhook server listening on {}", local_addr);

    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Webhook server shutting down");
            })
            .await
            .map_err(|e| tracing::error!("Webhook server error: {}", e))
            .ok();
        *running_clone.write().await = false;
    });

    Ok(WebhookServerHandle {
        shutdown_tx: Some(shutdown_tx),
        addr: local_addr,
        running,
    })
}

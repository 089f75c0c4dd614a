//! Webhook bridge server.
//!
//! Runs the webhook receiver and logs task lifecycle events as they
//! arrive. When `WEBHOOK_PUBLIC_URL` is set, the bridge registers that
//! URL with the agent service at startup and removes the registration on
//! shutdown.

use std::sync::Arc;

use taskbridge::client::{HttpAgentApi, TaskDetail};
use taskbridge::webhook::{start_webhook_server, WebhookServerConfig};
use taskbridge::{CompletionTracker, Config, TaskService, WebhookDispatcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("taskbridge=info")),
        )
        .init();

    let config = Config::from_env();

    let tracker = Arc::new(CompletionTracker::default());
    let dispatcher = Arc::new(WebhookDispatcher::with_created_hook(
        Arc::clone(&tracker),
        Arc::new(|detail: &TaskDetail| {
            tracing::info!(
                "Task {} created{}",
                detail.task_id,
                detail
                    .task_title
                    .as_deref()
                    .map(|t| format!(": {}", t))
                    .unwrap_or_default()
            );
        }),
    ));

    let server_config = WebhookServerConfig::new(config.webhook_host.clone(), config.webhook_port);
    let mut handle = start_webhook_server(server_config, dispatcher).await?;
    tracing::info!("Ready to receive deliveries at {}", handle.addr);

    // Optionally register the public URL with the service for the lifetime
    // of this process.
    let public_url = std::env::var("WEBHOOK_PUBLIC_URL").ok();
    let mut registration = None;
    if let Some(url) = public_url {
        config.validate()?;
        let api = Arc::new(HttpAgentApi::new(
            config.api_key.clone(),
            config.base_url.clone(),
        ));
        let service = TaskService::new(api, Arc::clone(&tracker), config.clone());
        match service.register_webhook(&url).await {
            Ok(reg) => {
                tracing::info!("Registered webhook {} for {}", reg.webhook_id, url);
                registration = Some((service, reg.webhook_id));
            }
            Err(err) => {
                tracing::warn!("Webhook registration failed, polling still works: {}", err);
            }
        }
    }

    tokio::signal::ctrl_c().await?;

    if let Some((service, webhook_id)) = registration {
        if let Err(err) = service.unregister_webhook(&webhook_id).await {
            tracing::warn!("Failed to remove webhook {}: {}", webhook_id, err);
        }
    }
    handle.stop().await;
    Ok(())
}

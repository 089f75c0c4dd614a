//! Webhook receiving: event wire format, dispatch, and the HTTP receiver.

mod dispatcher;
mod event;
mod server;

pub use dispatcher::{AckStatus, TaskCreatedHook, WebhookDispatcher};
pub use event::{WebhookError, WebhookEvent, WebhookEventType};
pub use server::{
    start_webhook_server, webhook_router, WebhookServerConfig, WebhookServerHandle,
};

//! # Taskbridge
//!
//! Completion tracking for long-running remote AI agent tasks.
//!
//! This library provides:
//! - A retrying client for the agent service's task and file APIs
//! - Two-phase file uploads with presigned-URL expiry handling
//! - A completion tracker that reconciles polling and webhook signals
//!   into exactly one resolution per task
//! - An embedded webhook receiver with validate-and-enqueue handlers
//!
//! ## Architecture
//!
//! ```text
//!   create_task ──▶ TaskService ──▶ AgentApi (reqwest)
//!                       │
//!                       ▼
//!               CompletionTracker ◀── WebhookDispatcher ◀── axum receiver
//!                       ▲
//!                       │
//!                 polling wait
//! ```
//!
//! ## Completion Flow
//! 1. A task is created and its handle registered with the tracker
//! 2. Completion arrives from a poll response or a webhook delivery,
//!    whichever observes the terminal state first
//! 3. The tracker resolves the task exactly once; late or duplicate
//!    observations are absorbed silently
//!
//! ## Modules
//! - `client`: transport trait, retrying caller, reqwest implementation
//! - `files`: attachment uploads and normalization
//! - `task`: the task entity and caller handles
//! - `tracker`: the dual-mode completion state machine
//! - `webhook`: delivery validation, dispatch, and the HTTP receiver

pub mod client;
pub mod config;
pub mod files;
pub mod service;
pub mod task;
pub mod tracker;
pub mod webhook;

pub use config::Config;
pub use service::{TaskOptions, TaskService};
pub use tracker::CompletionTracker;
pub use webhook::WebhookDispatcher;

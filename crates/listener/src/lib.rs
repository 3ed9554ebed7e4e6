//! Draft dispatch webhook receiver.
//!
//! Binds the HTTP surface GitHub delivers webhooks to, verifies every delivery
//! against the shared HMAC secret, and hands `pull_request` deliveries to the
//! [`dispatch::DispatchOrchestrator`] on a background task. The response never
//! waits for the pipeline.
//!
//! ## Endpoints
//!
//! | Route | Response |
//! |-------|----------|
//! | `POST /hook`, `POST /` | 200 once accepted; 400 missing event or delivery header; 403 missing or bad signature |
//! | `GET /healthz` | 200 `OK` |
//! | `GET /help` | JSON description of the plugin |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Transport, header handling and signature verification
//! live here. The [`dispatch`] crate sees only the raw event type, delivery
//! identifier and payload bytes.

#![warn(missing_docs)]

mod health;
mod server;
mod signature;
mod webhook;

pub use health::{health_handler, help_handler, PluginHelp, PLUGIN_DESCRIPTION, PLUGIN_NAME};
pub use server::{build_router, AppState};
pub use signature::{compute_signature, format_signature_header, parse_signature_header, verify_signature};
pub use webhook::{webhook_handler, WebhookError, EVENT_RECEIVED};

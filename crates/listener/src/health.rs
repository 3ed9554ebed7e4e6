//! Liveness and help endpoints.

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

/// Name the plugin reports on `/help`.
pub const PLUGIN_NAME: &str = "draft-dispatcher";

/// Description the plugin reports on `/help`.
pub const PLUGIN_DESCRIPTION: &str = "Starts presubmit jobs when a draft pull request is opened or \
     updated, or when an existing pull request is converted to a draft. Useful for jobs that \
     should only run while a pull request is in draft.";

/// Body of `GET /help`.
#[derive(Debug, Clone, Serialize)]
pub struct PluginHelp {
    /// Always [`PLUGIN_NAME`].
    pub name: &'static str,
    /// Always [`PLUGIN_DESCRIPTION`].
    pub description: &'static str,
}

/// `GET /healthz`: 200 `OK` while the server accepts connections.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// `GET /help`.
pub async fn help_handler() -> Json<PluginHelp> {
    Json(PluginHelp {
        name: PLUGIN_NAME,
        description: PLUGIN_DESCRIPTION,
    })
}

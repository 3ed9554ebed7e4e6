//! Webhook endpoint handler.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use dispatch::{EventId, PULL_REQUEST_EVENT};

use crate::server::AppState;
use crate::signature::verify_signature;

/// Body of every accepted delivery.
pub const EVENT_RECEIVED: &str = "Event received. Have a nice day.";

const HEADER_EVENT: &str = "x-github-event";
const HEADER_DELIVERY: &str = "x-github-delivery";
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// Reasons a delivery is refused.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// A routing header is absent or empty. Answered with 400.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// The signature header is absent or does not match the body. Answered
    /// with 403.
    #[error("invalid signature")]
    InvalidSignature,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match self {
            WebhookError::MissingHeader(_) => StatusCode::BAD_REQUEST,
            WebhookError::InvalidSignature => StatusCode::FORBIDDEN,
        };
        (status, self.to_string()).into_response()
    }
}

/// `POST /hook` and `POST /`.
///
/// Verifies the delivery, acknowledges it, and runs the dispatch pipeline for
/// `pull_request` events on a tracked background task. Pipeline failures are
/// logged; they never change the response.
pub async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    let event_type = get_header(&headers, HEADER_EVENT)?;
    let delivery = get_header(&headers, HEADER_DELIVERY)?;
    let event_id = EventId::new(delivery).ok_or(WebhookError::MissingHeader(HEADER_DELIVERY))?;
    let Ok(signature) = get_header(&headers, HEADER_SIGNATURE) else {
        warn!(event_id = %event_id, event_type = %event_type, "Unsigned webhook delivery");
        return Err(WebhookError::InvalidSignature);
    };

    if !verify_signature(&body, &signature, state.webhook_secret()) {
        warn!(event_id = %event_id, event_type = %event_type, "Invalid webhook signature");
        return Err(WebhookError::InvalidSignature);
    }

    if event_type != PULL_REQUEST_EVENT {
        debug!(event_id = %event_id, event_type = %event_type, "Ignoring event");
        return Ok((StatusCode::OK, EVENT_RECEIVED));
    }

    let orchestrator = state.orchestrator();
    state.tasks().spawn(async move {
        match orchestrator.handle_event(&event_type, event_id, &body).await {
            Ok(report) => info!(stage = ?report.stage(), "Pipeline finished"),
            Err(e) => error!(error = %e, "Error handling event"),
        }
    });

    Ok((StatusCode::OK, EVENT_RECEIVED))
}

fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(WebhookError::MissingHeader(name))
}

//! Router and shared state.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::task::TaskTracker;

use dispatch::DispatchOrchestrator;

use crate::health::{health_handler, help_handler};
use crate::webhook::webhook_handler;

/// Shared application state, passed to handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    orchestrator: Arc<DispatchOrchestrator>,
    webhook_secret: Vec<u8>,
    tasks: TaskTracker,
}

impl AppState {
    /// Creates the state for a listener dispatching through `orchestrator`.
    ///
    /// Pipelines are spawned on `tasks`, so the caller can wait for in-flight
    /// deliveries on shutdown.
    pub fn new(
        orchestrator: Arc<DispatchOrchestrator>,
        webhook_secret: impl Into<Vec<u8>>,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                orchestrator,
                webhook_secret: webhook_secret.into(),
                tasks,
            }),
        }
    }

    /// Handle to the pipeline deliveries are dispatched through.
    pub fn orchestrator(&self) -> Arc<DispatchOrchestrator> {
        Arc::clone(&self.inner.orchestrator)
    }

    /// HMAC key deliveries are verified against.
    pub fn webhook_secret(&self) -> &[u8] {
        &self.inner.webhook_secret
    }

    /// Tracker owning every in-flight pipeline task.
    pub fn tasks(&self) -> &TaskTracker {
        &self.inner.tasks
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("orchestrator", &self.inner.orchestrator)
            .field("in_flight", &self.inner.tasks.len())
            .finish_non_exhaustive()
    }
}

/// Builds the router serving `/hook`, `/healthz` and `/help`.
///
/// Deliveries are also accepted on `/`, where GitHub hooks configured with a
/// bare host URL post.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(webhook_handler))
        .route("/hook", post(webhook_handler))
        .route("/healthz", get(health_handler))
        .route("/help", get(help_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use dispatch::test_utils::{job, RecordingJobStore, StaticRefs, StaticResolver, StaticTrust};
    use dispatch::{Collaborators, DispatchConfig};
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    use crate::signature::{compute_signature, format_signature_header};
    use crate::webhook::EVENT_RECEIVED;

    const SECRET: &[u8] = b"test-secret";

    struct Fixture {
        state: AppState,
        store: Arc<RecordingJobStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(RecordingJobStore::new());
        let config = DispatchConfig {
            retry_base_unit: Duration::from_micros(1),
            ..DispatchConfig::default()
        };
        let orchestrator = DispatchOrchestrator::new(
            &config,
            Collaborators {
                trust: Arc::new(StaticTrust::trusted()),
                refs: Arc::new(StaticRefs::new("fedcba9876543210fedcba9876543210fedcba98")),
                resolver: Arc::new(StaticResolver::new(vec![job("unit-tests"), job("e2e-tests")])),
                store: store.clone(),
            },
        )
        .unwrap();
        Fixture {
            state: AppState::new(Arc::new(orchestrator), SECRET, TaskTracker::new()),
            store,
        }
    }

    fn pull_request_body(action: &str, draft: bool) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "action": action,
            "number": 42,
            "pull_request": {
                "number": 42,
                "draft": draft,
                "user": { "login": "alice" },
                "head": { "sha": "0123456789abcdef0123456789abcdef01234567" },
                "base": {
                    "ref": "main",
                    "repo": { "name": "test", "owner": { "login": "k8s" } }
                }
            },
            "repository": { "name": "test", "owner": { "login": "k8s" } }
        }))
        .unwrap()
    }

    fn hook_request(event: &str, body: Vec<u8>, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/hook")
            .header("content-type", "application/json")
            .header("x-github-event", event)
            .header("x-github-delivery", "72d3162e-cc78-11e3-81ab-4c9367dc0958");
        if let Some(signature) = signature {
            builder = builder.header("x-hub-signature-256", signature);
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn signed(event: &str, body: Vec<u8>) -> Request<Body> {
        let signature = format_signature_header(&compute_signature(&body, SECRET));
        hook_request(event, body, Some(signature))
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn drain(state: &AppState) {
        state.tasks().close();
        state.tasks().wait().await;
    }

    #[tokio::test]
    async fn valid_draft_delivery_runs_the_pipeline() {
        let f = fixture();
        let app = build_router(f.state.clone());

        let response = app
            .oneshot(signed("pull_request", pull_request_body("converted_to_draft", true)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, EVENT_RECEIVED);
        drain(&f.state).await;
        assert_eq!(f.store.created_job_names(), ["unit-tests", "e2e-tests"]);
        assert_eq!(
            f.store.created()[0].event_id().as_str(),
            "72d3162e-cc78-11e3-81ab-4c9367dc0958"
        );
    }

    #[tokio::test]
    async fn ready_for_review_delivery_is_acknowledged_without_dispatch() {
        let f = fixture();
        let app = build_router(f.state.clone());

        let response = app
            .oneshot(signed("pull_request", pull_request_body("opened", false)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        drain(&f.state).await;
        assert_eq!(f.store.attempts(), 0);
    }

    #[tokio::test]
    async fn bad_signature_is_forbidden() {
        let f = fixture();
        let app = build_router(f.state.clone());
        let body = pull_request_body("opened", true);
        let signature = format_signature_header(&compute_signature(&body, b"wrong-secret"));

        let response = app
            .oneshot(hook_request("pull_request", body, Some(signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        drain(&f.state).await;
        assert_eq!(f.store.attempts(), 0);
    }

    #[tokio::test]
    async fn missing_signature_is_forbidden() {
        let f = fixture();
        let app = build_router(f.state.clone());

        let response = app
            .oneshot(hook_request("pull_request", pull_request_body("opened", true), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        drain(&f.state).await;
        assert_eq!(f.store.attempts(), 0);
    }

    #[tokio::test]
    async fn missing_event_header_is_bad_request() {
        let f = fixture();
        let app = build_router(f.state.clone());
        let body = pull_request_body("opened", true);
        let signature = format_signature_header(&compute_signature(&body, SECRET));
        let request = Request::builder()
            .method("POST")
            .uri("/hook")
            .header("x-github-delivery", "72d3162e-cc78-11e3-81ab-4c9367dc0958")
            .header("x-hub-signature-256", signature)
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("x-github-event"));
    }

    #[tokio::test]
    async fn deliveries_to_the_root_path_are_accepted() {
        let f = fixture();
        let app = build_router(f.state.clone());
        let mut request = signed("pull_request", pull_request_body("opened", true));
        *request.uri_mut() = "/".parse().unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, EVENT_RECEIVED);
        drain(&f.state).await;
        assert_eq!(f.store.created_job_names(), ["unit-tests", "e2e-tests"]);
    }

    #[tokio::test]
    async fn other_events_are_acknowledged_and_ignored() {
        let f = fixture();
        let app = build_router(f.state.clone());

        let response = app
            .oneshot(signed("issue_comment", pull_request_body("opened", true)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(f.state.tasks().len(), 0);
        drain(&f.state).await;
        assert_eq!(f.store.attempts(), 0);
    }

    #[tokio::test]
    async fn undecodable_payload_still_gets_200() {
        let f = fixture();
        let app = build_router(f.state.clone());

        let response = app
            .oneshot(signed("pull_request", b"{not json".to_vec()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        drain(&f.state).await;
        assert_eq!(f.store.attempts(), 0);
    }

    #[tokio::test]
    async fn healthz_and_help_respond() {
        let f = fixture();

        let health = build_router(f.state.clone())
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
        assert_eq!(body_string(health).await, "OK");

        let help = build_router(f.state.clone())
            .oneshot(Request::get("/help").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(help.status(), StatusCode::OK);
        let value: serde_json::Value = serde_json::from_str(&body_string(help).await).unwrap();
        assert_eq!(value["name"], "draft-dispatcher");
    }
}

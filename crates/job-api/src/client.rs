//! `reqwest`-backed job API client.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use dispatch::{
    CreateError, CreateErrorKind, DispatchRequest, JobDefinition, JobName,
    JobRecordAck, JobRecordStore, LazySha, Namespace, PresubmitResolver, RepositoryId,
    ResolutionError,
};

use crate::record::JobRecord;

const USER_AGENT: &str = "draft-dispatcher";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors talking to the job API outside of job record creation.
#[derive(Debug, Error)]
pub enum JobApiError {
    /// Transport failure or undecodable response body.
    #[error("job API request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The job API answered with a status other than 200.
    #[error("job API error (HTTP {status}) for {path}: {body}")]
    UnexpectedStatus {
        /// The HTTP status code.
        status: u16,
        /// The request path.
        path: String,
        /// Response body, as sent.
        body: String,
    },

    /// A presubmit definition came back with an empty name.
    #[error("job API returned a presubmit without a name for {repository}")]
    UnnamedPresubmit {
        /// Repository whose presubmits were being resolved.
        repository: RepositoryId,
    },
}

impl From<JobApiError> for ResolutionError {
    fn from(err: JobApiError) -> Self {
        ResolutionError::Upstream(err.to_string())
    }
}

/// Maps the status of a create response onto its outcome.
///
/// 200 and 201 mean the record was created and 409 that it already exists.
/// Timeouts, throttling and server errors are worth another attempt; any other
/// status will fail the same way again.
pub fn classify_status(status: StatusCode) -> Result<JobRecordAck, CreateErrorKind> {
    match status {
        StatusCode::OK | StatusCode::CREATED => Ok(JobRecordAck::Created),
        StatusCode::CONFLICT => Err(CreateErrorKind::AlreadyExists),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Err(CreateErrorKind::Transient)
        }
        s if s.is_server_error() => Err(CreateErrorKind::Transient),
        _ => Err(CreateErrorKind::Fatal),
    }
}

#[derive(Debug, Deserialize)]
struct RawPresubmit {
    name: String,
    #[serde(default)]
    spec: serde_json::Value,
}

/// Job API client, safe to share across concurrent pipeline runs.
#[derive(Debug, Clone)]
pub struct JobApiClient {
    http: reqwest::Client,
    endpoint: String,
    inrepo_config: HashSet<RepositoryId>,
}

impl JobApiClient {
    /// Creates a client for `endpoint`.
    ///
    /// `inrepo_config` lists the repositories whose job configuration is read
    /// from the repository itself.
    pub fn new(
        endpoint: impl Into<String>,
        inrepo_config: impl IntoIterator<Item = RepositoryId>,
    ) -> Result<Self, JobApiError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            inrepo_config: inrepo_config.into_iter().collect(),
        })
    }

    /// Returns `true` when `repository` keeps its job configuration in-tree.
    pub fn uses_inrepo_config(&self, repository: &RepositoryId) -> bool {
        self.inrepo_config.contains(repository)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }
}

#[async_trait]
impl PresubmitResolver for JobApiClient {
    async fn resolve_presubmits(
        &self,
        repository: &RepositoryId,
        base_sha: &LazySha<'_>,
        head_sha: &LazySha<'_>,
    ) -> Result<Vec<JobDefinition>, ResolutionError> {
        let path = format!("/repos/{}/{}/presubmits", repository.org(), repository.repo());
        let mut request = self.http.get(self.url(&path));
        if self.uses_inrepo_config(repository) {
            let base = base_sha.get().await?;
            let head = head_sha.get().await?;
            request = request.query(&[("base_sha", base.as_str()), ("head_sha", head.as_str())]);
        }

        let response = request.send().await.map_err(JobApiError::from)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobApiError::UnexpectedStatus {
                status: status.as_u16(),
                path,
                body,
            }
            .into());
        }
        let raw: Vec<RawPresubmit> = response.json().await.map_err(JobApiError::from)?;

        let definitions = raw
            .into_iter()
            .map(|p| -> Result<JobDefinition, JobApiError> {
                let name = JobName::new(p.name).ok_or_else(|| JobApiError::UnnamedPresubmit {
                    repository: repository.clone(),
                })?;
                Ok(JobDefinition {
                    name,
                    repository: repository.clone(),
                    spec: p.spec,
                })
            })
            .collect::<Result<Vec<_>, JobApiError>>()?;
        debug!(repository = %repository, count = definitions.len(), "Resolved presubmits");
        Ok(definitions)
    }
}

#[async_trait]
impl JobRecordStore for JobApiClient {
    async fn create_job_record(
        &self,
        namespace: &Namespace,
        request: &DispatchRequest,
    ) -> Result<JobRecordAck, CreateError> {
        let record = JobRecord::from_request(namespace, request);
        let response = self
            .http
            .post(self.url(&format!("/namespaces/{namespace}/jobs")))
            .json(&record)
            .send()
            .await
            .map_err(|e| CreateError::transient(format!("job API request failed: {e}")))?;

        let status = response.status();
        match classify_status(status) {
            Ok(ack) => {
                info!(job = %record.job, record = %record.name, namespace = %namespace, "Created job record");
                Ok(ack)
            }
            Err(kind) => {
                let body = response.text().await.unwrap_or_default();
                Err(CreateError {
                    kind,
                    message: format!(
                        "job API returned HTTP {} creating {}: {}",
                        status.as_u16(),
                        record.name,
                        body.trim()
                    ),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use dispatch::test_utils::{change_event, job};
    use dispatch::{CommitSha, PullRequestAction, ShaFuture};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn repository() -> RepositoryId {
        RepositoryId::parse("k8s/test").unwrap()
    }

    /// A getter that counts how often it is fetched.
    fn counting_sha(sha: &'static str, fetches: Arc<AtomicU32>) -> LazySha<'static> {
        LazySha::new(move || -> ShaFuture<'static> {
            let fetches = Arc::clone(&fetches);
            Box::pin(async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(CommitSha::new(sha).unwrap())
            })
        })
    }

    type SeenQueries = Arc<Mutex<Vec<HashMap<String, String>>>>;

    async fn presubmit_server() -> (String, SeenQueries) {
        let seen: SeenQueries = Arc::default();
        let router = Router::new()
            .route(
                "/repos/{org}/{repo}/presubmits",
                get(
                    |State(seen): State<SeenQueries>,
                     Path((org, repo)): Path<(String, String)>,
                     Query(query): Query<HashMap<String, String>>| async move {
                        seen.lock().unwrap().push(query);
                        if org != "k8s" || repo != "test" {
                            return Err(AxumStatus::NOT_FOUND);
                        }
                        Ok(Json(json!([
                            { "name": "unit-tests", "branches": ["main"], "spec": { "image": "rust" } },
                            { "name": "e2e-tests" }
                        ])))
                    },
                ),
            )
            .with_state(Arc::clone(&seen));
        (serve(router).await, seen)
    }

    #[test]
    fn statuses_classify_onto_create_outcomes() {
        assert_eq!(classify_status(StatusCode::CREATED), Ok(JobRecordAck::Created));
        assert_eq!(classify_status(StatusCode::OK), Ok(JobRecordAck::Created));
        assert_eq!(classify_status(StatusCode::CONFLICT), Err(CreateErrorKind::AlreadyExists));
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), Err(CreateErrorKind::Transient));
        assert_eq!(classify_status(StatusCode::REQUEST_TIMEOUT), Err(CreateErrorKind::Transient));
        assert_eq!(classify_status(StatusCode::SERVICE_UNAVAILABLE), Err(CreateErrorKind::Transient));
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), Err(CreateErrorKind::Fatal));
        assert_eq!(classify_status(StatusCode::FORBIDDEN), Err(CreateErrorKind::Fatal));
    }

    #[tokio::test]
    async fn resolves_presubmits_without_touching_commits() {
        let (url, seen) = presubmit_server().await;
        let client = JobApiClient::new(url, []).unwrap();
        let fetches = Arc::new(AtomicU32::new(0));
        let base = counting_sha("base", Arc::clone(&fetches));
        let head = counting_sha("head", Arc::clone(&fetches));

        let jobs = client.resolve_presubmits(&repository(), &base, &head).await.unwrap();

        let names: Vec<_> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, ["unit-tests", "e2e-tests"]);
        assert_eq!(jobs[0].spec, json!({ "image": "rust" }));
        assert_eq!(jobs[1].spec, Value::Null);
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
        assert!(seen.lock().unwrap()[0].is_empty());
    }

    #[tokio::test]
    async fn inrepo_config_repositories_send_both_commits() {
        let (url, seen) = presubmit_server().await;
        let client = JobApiClient::new(url, [repository()]).unwrap();
        let fetches = Arc::new(AtomicU32::new(0));
        let base = counting_sha("base", Arc::clone(&fetches));
        let head = counting_sha("head", Arc::clone(&fetches));

        client.resolve_presubmits(&repository(), &base, &head).await.unwrap();

        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        let query = seen.lock().unwrap()[0].clone();
        assert_eq!(query.get("base_sha").map(String::as_str), Some("base"));
        assert_eq!(query.get("head_sha").map(String::as_str), Some("head"));
    }

    #[tokio::test]
    async fn failed_resolution_is_upstream_error() {
        let (url, _) = presubmit_server().await;
        let client = JobApiClient::new(url, []).unwrap();
        let other = RepositoryId::parse("k8s/other").unwrap();
        let sha = LazySha::ready(CommitSha::new("abc").unwrap());

        let err = client.resolve_presubmits(&other, &sha, &sha).await.unwrap_err();

        assert!(matches!(err, ResolutionError::Upstream(ref m) if m.contains("404")), "{err}");
    }

    #[derive(Clone, Default)]
    struct JobsState {
        records: Arc<Mutex<Vec<(String, JobRecord)>>>,
        responses: Arc<Mutex<Vec<AxumStatus>>>,
    }

    async fn jobs_server(responses: Vec<AxumStatus>) -> (String, JobsState) {
        let state = JobsState {
            responses: Arc::new(Mutex::new(responses)),
            ..JobsState::default()
        };
        let router = Router::new()
            .route(
                "/namespaces/{ns}/jobs",
                post(
                    |State(state): State<JobsState>,
                     Path(ns): Path<String>,
                     Json(record): Json<JobRecord>| async move {
                        let status = state.responses.lock().unwrap().pop().unwrap_or(AxumStatus::CREATED);
                        if status == AxumStatus::CREATED {
                            state.records.lock().unwrap().push((ns, record));
                        }
                        (status, "response body")
                    },
                ),
            )
            .with_state(state.clone());
        (serve(router).await, state)
    }

    fn request() -> DispatchRequest {
        DispatchRequest::new(
            job("e2e-tests"),
            change_event(PullRequestAction::ConvertedToDraft, true),
            None,
        )
    }

    #[tokio::test]
    async fn create_posts_record_to_namespace() {
        let (url, state) = jobs_server(Vec::new()).await;
        let client = JobApiClient::new(url, []).unwrap();
        let request = request();

        let ack = client
            .create_job_record(&Namespace::new("ci").unwrap(), &request)
            .await
            .unwrap();

        assert_eq!(ack, JobRecordAck::Created);
        let records = state.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, "ci");
        assert_eq!(records[0].1.name, request.record_name.to_string());
        assert_eq!(records[0].1.job, "e2e-tests");
    }

    #[tokio::test]
    async fn create_maps_error_statuses() {
        let cases = [
            (AxumStatus::CONFLICT, CreateErrorKind::AlreadyExists),
            (AxumStatus::BAD_GATEWAY, CreateErrorKind::Transient),
            (AxumStatus::UNPROCESSABLE_ENTITY, CreateErrorKind::Fatal),
        ];
        for (status, kind) in cases {
            let (url, _) = jobs_server(vec![status]).await;
            let client = JobApiClient::new(url, []).unwrap();

            let err = client
                .create_job_record(&Namespace::new("default").unwrap(), &request())
                .await
                .unwrap_err();

            assert_eq!(err.kind, kind, "{status}");
            assert!(err.message.contains(&status.as_u16().to_string()));
        }
    }

    #[tokio::test]
    async fn unreachable_job_api_is_transient() {
        // Bind then drop so the port is very likely closed.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = JobApiClient::new(format!("http://{addr}"), []).unwrap();

        let err = client
            .create_job_record(&Namespace::new("default").unwrap(), &request())
            .await
            .unwrap_err();

        assert_eq!(err.kind, CreateErrorKind::Transient);
    }
}

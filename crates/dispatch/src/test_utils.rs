//! In-memory implementations of every port, plus record builders.
//!
//! Compiled for this crate's tests and, behind the `test-utils` feature, for
//! the tests of downstream crates.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::{
    BranchName, ChangeEvent, CommitSha, CreateError, DispatchRequest, EventId, JobDefinition,
    JobName, JobRecordAck, JobRecordStore, LazySha, Namespace, OrgName, PresubmitResolver,
    PullRequestAction, PullRequestNumber, RefLookup, RefLookupError, RepoName, RepositoryId,
    ResolutionError, TrustError, TrustEvaluator, TrustVerdict, UserLogin,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Builders ─────────────────────────────────────────────────────────────────

/// Head commit used by [`change_event`].
pub const HEAD_SHA: &str = "0123456789abcdef0123456789abcdef01234567";

/// A change by `alice` against `k8s/test@main`, PR #42.
pub fn change_event(action: PullRequestAction, is_draft: bool) -> ChangeEvent {
    ChangeEvent {
        org: OrgName::new("k8s").unwrap(),
        repo: RepoName::new("test").unwrap(),
        repo_owner: UserLogin::new("k8s").unwrap(),
        author: UserLogin::new("alice").unwrap(),
        base_ref: BranchName::new("main").unwrap(),
        head_sha: CommitSha::new(HEAD_SHA).unwrap(),
        number: PullRequestNumber::new(42),
        action,
        is_draft,
        event_id: EventId::new("delivery-0001").unwrap(),
        html_url: None,
    }
}

/// A presubmit named `name` for `k8s/test`.
pub fn job(name: &str) -> JobDefinition {
    JobDefinition {
        name: JobName::new(name).expect("job name must not be empty"),
        repository: RepositoryId::parse("k8s/test").unwrap(),
        spec: serde_json::Value::Null,
    }
}

// ─── Trust ────────────────────────────────────────────────────────────────────

/// Returns a fixed verdict (or failure) and counts calls.
#[derive(Debug)]
pub struct StaticTrust {
    verdict: Result<TrustVerdict, String>,
    calls: AtomicU32,
}

impl StaticTrust {
    /// Every author is trusted.
    pub fn trusted() -> Self {
        Self::with(Ok(TrustVerdict::TRUSTED))
    }

    /// No author is trusted.
    pub fn untrusted() -> Self {
        Self::with(Ok(TrustVerdict::UNTRUSTED))
    }

    /// Every evaluation fails.
    pub fn failing(message: &str) -> Self {
        Self::with(Err(message.to_string()))
    }

    fn with(verdict: Result<TrustVerdict, String>) -> Self {
        Self {
            verdict,
            calls: AtomicU32::new(0),
        }
    }

    /// Number of evaluations so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrustEvaluator for StaticTrust {
    async fn evaluate_trust(
        &self,
        _org: &OrgName,
        _repo: &RepoName,
        _repo_owner: &UserLogin,
        _author: &UserLogin,
    ) -> Result<TrustVerdict, TrustError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.verdict.clone().map_err(TrustError::new)
    }
}

// ─── Refs ─────────────────────────────────────────────────────────────────────

/// Resolves every ref to one commit (or fails) and records what was asked for.
#[derive(Debug)]
pub struct StaticRefs {
    sha: Result<CommitSha, String>,
    requested: Mutex<Vec<String>>,
}

impl StaticRefs {
    /// Every ref points at `sha`.
    pub fn new(sha: &str) -> Self {
        Self {
            sha: CommitSha::new(sha).ok_or_else(|| "empty sha".to_string()),
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Every lookup fails.
    pub fn failing(message: &str) -> Self {
        Self {
            sha: Err(message.to_string()),
            requested: Mutex::new(Vec::new()),
        }
    }

    /// The refs looked up so far, in order.
    pub fn requested(&self) -> Vec<String> {
        lock(&self.requested).clone()
    }
}

#[async_trait]
impl RefLookup for StaticRefs {
    async fn get_ref(
        &self,
        _org: &OrgName,
        _repo: &RepoName,
        reference: &str,
    ) -> Result<CommitSha, RefLookupError> {
        lock(&self.requested).push(reference.to_string());
        self.sha.clone().map_err(|message| RefLookupError {
            reference: reference.to_string(),
            message,
        })
    }
}

// ─── Presubmits ───────────────────────────────────────────────────────────────

/// Returns a fixed job list, optionally forcing the lazy getters first.
#[derive(Debug)]
pub struct StaticResolver {
    jobs: Result<Vec<JobDefinition>, String>,
    needs_commits: bool,
    calls: AtomicU32,
}

impl StaticResolver {
    /// Resolves to `jobs` without touching the getters.
    pub fn new(jobs: Vec<JobDefinition>) -> Self {
        Self {
            jobs: Ok(jobs),
            needs_commits: false,
            calls: AtomicU32::new(0),
        }
    }

    /// Every resolution fails.
    pub fn failing(message: &str) -> Self {
        Self {
            jobs: Err(message.to_string()),
            needs_commits: false,
            calls: AtomicU32::new(0),
        }
    }

    /// Calls both getters before answering, like in-repo job config does.
    pub fn requiring_commits(mut self) -> Self {
        self.needs_commits = true;
        self
    }

    /// Number of resolutions so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PresubmitResolver for StaticResolver {
    async fn resolve_presubmits(
        &self,
        _repository: &RepositoryId,
        base_sha: &LazySha<'_>,
        head_sha: &LazySha<'_>,
    ) -> Result<Vec<JobDefinition>, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.needs_commits {
            base_sha.get().await?;
            head_sha.get().await?;
        }
        self.jobs.clone().map_err(ResolutionError::Upstream)
    }
}

// ─── Job records ──────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Scripted {
    Fail(CreateError),
    FailAfterCommit(CreateError),
}

#[derive(Debug, Default)]
struct StoreState {
    created: Vec<(Namespace, DispatchRequest)>,
    script: VecDeque<Scripted>,
    always: Option<CreateError>,
    fail_jobs: Vec<(JobName, CreateError)>,
}

impl StoreState {
    fn exists(&self, request: &DispatchRequest) -> bool {
        self.created
            .iter()
            .any(|(_, r)| r.record_name == request.record_name)
    }
}

/// A job store keyed by record name, with scriptable failures.
///
/// Creating an existing name fails with `AlreadyExists`, like a real store.
#[derive(Debug, Default)]
pub struct RecordingJobStore {
    state: Mutex<StoreState>,
    attempts: AtomicU32,
}

impl RecordingJobStore {
    /// An empty, healthy store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store where every create fails with `error`.
    pub fn always_failing(error: CreateError) -> Self {
        let store = Self::new();
        lock(&store.state).always = Some(error);
        store
    }

    /// The next unscripted create fails with `error` without creating anything.
    pub fn fail_next(&self, error: CreateError) {
        lock(&self.state).script.push_back(Scripted::Fail(error));
    }

    /// The next unscripted create commits the record, then reports `error`
    /// (a response lost after the write).
    pub fn fail_next_after_commit(&self, error: CreateError) {
        lock(&self.state)
            .script
            .push_back(Scripted::FailAfterCommit(error));
    }

    /// Every create for `job` fails with `error`.
    pub fn fail_job(&self, job: &str, error: CreateError) {
        let name = JobName::new(job).expect("job name must not be empty");
        lock(&self.state).fail_jobs.push((name, error));
    }

    /// Records created so far, in creation order.
    pub fn created(&self) -> Vec<DispatchRequest> {
        lock(&self.state)
            .created
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Names of the jobs created so far, in creation order.
    pub fn created_job_names(&self) -> Vec<String> {
        self.created()
            .into_iter()
            .map(|r| r.job.name.as_str().to_string())
            .collect()
    }

    /// Namespaces records were created in, in creation order.
    pub fn namespaces(&self) -> Vec<Namespace> {
        lock(&self.state)
            .created
            .iter()
            .map(|(ns, _)| ns.clone())
            .collect()
    }

    /// Create calls so far, including failed ones.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobRecordStore for RecordingJobStore {
    async fn create_job_record(
        &self,
        namespace: &Namespace,
        request: &DispatchRequest,
    ) -> Result<JobRecordAck, CreateError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.state);

        if let Some(error) = &state.always {
            return Err(error.clone());
        }
        if let Some((_, error)) = state.fail_jobs.iter().find(|(j, _)| *j == request.job.name) {
            return Err(error.clone());
        }
        match state.script.pop_front() {
            Some(Scripted::Fail(error)) => return Err(error),
            Some(Scripted::FailAfterCommit(error)) => {
                if !state.exists(request) {
                    state.created.push((namespace.clone(), request.clone()));
                }
                return Err(error);
            }
            None => {}
        }
        if state.exists(request) {
            return Err(CreateError::already_exists(format!(
                "job record {} already exists",
                request.record_name
            )));
        }
        state.created.push((namespace.clone(), request.clone()));
        Ok(JobRecordAck::Created)
    }
}

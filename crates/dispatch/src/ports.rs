//! Port traits implemented by infrastructure crates.
//!
//! The orchestrator only ever sees these traits. Implementations must be safe
//! for concurrent use: one handle is shared by every in-flight pipeline run.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::{
    CommitSha, CreateError, DispatchRequest, JobDefinition, JobRecordAck, Namespace, OrgName,
    RefLookupError, RepoName, RepositoryId, ResolutionError, TrustError, TrustVerdict, UserLogin,
};

// ---------------------------------------------------------------------------
// Collaborator ports
// ---------------------------------------------------------------------------

/// Decides whether an author may run CI without manual approval.
#[async_trait]
pub trait TrustEvaluator: Send + Sync {
    /// Evaluates trust for `author` opening changes against `org/repo`.
    ///
    /// `repo_owner` is the login owning the repository the event was
    /// delivered for. An untrusted author is `Ok(TrustVerdict::UNTRUSTED)`;
    /// `Err` is reserved for failures of the evaluation itself.
    async fn evaluate_trust(
        &self,
        org: &OrgName,
        repo: &RepoName,
        repo_owner: &UserLogin,
        author: &UserLogin,
    ) -> Result<TrustVerdict, TrustError>;
}

/// Resolves a remote Git ref (e.g. `heads/main`) to the commit it points at.
#[async_trait]
pub trait RefLookup: Send + Sync {
    /// Returns the commit `reference` currently points at in `org/repo`.
    async fn get_ref(
        &self,
        org: &OrgName,
        repo: &RepoName,
        reference: &str,
    ) -> Result<CommitSha, RefLookupError>;
}

/// Supplies the presubmit job definitions applicable to a repository.
#[async_trait]
pub trait PresubmitResolver: Send + Sync {
    /// Returns every presubmit definition for `repository`, in configuration order.
    ///
    /// `base_sha` and `head_sha` are lazy: implementations call
    /// [`LazySha::get`] only when the definitions depend on the commits
    /// (e.g. job config stored in the repository itself).
    async fn resolve_presubmits(
        &self,
        repository: &RepositoryId,
        base_sha: &LazySha<'_>,
        head_sha: &LazySha<'_>,
    ) -> Result<Vec<JobDefinition>, ResolutionError>;
}

/// Creates job records, keyed by [`DispatchRequest::record_name`].
///
/// A create for a name that already exists must fail with
/// [`crate::CreateErrorKind::AlreadyExists`] rather than create a second record.
#[async_trait]
pub trait JobRecordStore: Send + Sync {
    /// Creates the record described by `request` in `namespace`.
    async fn create_job_record(
        &self,
        namespace: &Namespace,
        request: &DispatchRequest,
    ) -> Result<JobRecordAck, CreateError>;
}

// ---------------------------------------------------------------------------
// Lazy commit getters
// ---------------------------------------------------------------------------

/// Future returned by a [`LazySha`] fetch function.
pub type ShaFuture<'a> = Pin<Box<dyn Future<Output = Result<CommitSha, ResolutionError>> + Send + 'a>>;

type ShaFetch<'a> = Box<dyn Fn() -> ShaFuture<'a> + Send + Sync + 'a>;

/// A commit SHA that is fetched on first use and memoised afterwards.
///
/// Concurrent callers of [`LazySha::get`] share a single fetch.
pub struct LazySha<'a> {
    cell: OnceCell<CommitSha>,
    fetch: ShaFetch<'a>,
}

impl<'a> LazySha<'a> {
    /// Creates a getter that runs `fetch` the first time the value is needed.
    pub fn new<F>(fetch: F) -> Self
    where
        F: Fn() -> ShaFuture<'a> + Send + Sync + 'a,
    {
        Self {
            cell: OnceCell::new(),
            fetch: Box::new(fetch),
        }
    }

    /// Creates a getter whose value is already known.
    pub fn ready(sha: CommitSha) -> Self {
        let fallback = sha.clone();
        Self {
            cell: OnceCell::new_with(Some(sha)),
            fetch: Box::new(move || -> ShaFuture<'a> {
                let sha = fallback.clone();
                Box::pin(async move { Ok(sha) })
            }),
        }
    }

    /// Returns the SHA, fetching it if this is the first call.
    ///
    /// A failed fetch is not memoised; the next call tries again.
    pub async fn get(&self) -> Result<&CommitSha, ResolutionError> {
        self.cell.get_or_try_init(|| (self.fetch)()).await
    }

    /// Returns the SHA if it has already been fetched, without fetching it.
    pub fn resolved(&self) -> Option<&CommitSha> {
        self.cell.get()
    }
}

impl std::fmt::Debug for LazySha<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazySha")
            .field("resolved", &self.cell.get())
            .finish_non_exhaustive()
    }
}

//! Error types for the dispatch domain.
//!
//! Each collaborator port has its own error type so adapters can report
//! failures without knowing about the pipeline. [`DispatchError`] is the single
//! value the orchestrator hands back to its caller for one event.

use std::fmt;

use thiserror::Error;

use crate::{DispatchOutcome, JobName, JobRecordName};

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// The raw webhook payload could not be turned into a [`crate::ChangeEvent`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The delivery is not a `pull_request` event.
    #[error("unsupported event type '{0}'")]
    UnsupportedEventType(String),

    /// JSON deserialisation failed (includes structurally missing objects).
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A required identity field is present but empty.
    #[error("payload is missing required field '{0}'")]
    MissingField(&'static str),
}

// ---------------------------------------------------------------------------
// Collaborator failures
// ---------------------------------------------------------------------------

/// The trust-evaluation collaborator could not produce a verdict.
///
/// This is distinct from an untrusted verdict, which is a normal result.
#[derive(Debug, Error)]
#[error("trust evaluation failed: {message}")]
pub struct TrustError {
    /// Description of the upstream failure.
    pub message: String,
}

impl TrustError {
    /// Creates a trust error from any displayable cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A remote Git ref could not be resolved to a commit.
#[derive(Debug, Error)]
#[error("failed to look up ref '{reference}': {message}")]
pub struct RefLookupError {
    /// The ref that was requested (e.g. `heads/main`).
    pub reference: String,
    /// Description of the upstream failure.
    pub message: String,
}

/// Presubmit definitions could not be resolved for a repository.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The base commit needed by the resolver could not be looked up.
    #[error("failed to get base SHA: {0}")]
    BaseSha(#[from] RefLookupError),

    /// The job-config collaborator failed.
    #[error("presubmit resolution failed: {0}")]
    Upstream(String),
}

// ---------------------------------------------------------------------------
// Job record creation
// ---------------------------------------------------------------------------

/// How a job store classified a failed create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateErrorKind {
    /// A record with the requested name already exists.
    AlreadyExists,
    /// Transient failure (timeouts, throttling, 5xx); safe to retry.
    Transient,
    /// The store rejected the request; retrying cannot help.
    Fatal,
}

impl CreateErrorKind {
    /// Returns `true` if the failed create may be attempted again.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// A single failed call to [`crate::JobRecordStore::create_job_record`].
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CreateError {
    /// Classification used by the retry loop.
    pub kind: CreateErrorKind,
    /// Description of the failure.
    pub message: String,
}

impl CreateError {
    /// A record with the requested name already exists.
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self {
            kind: CreateErrorKind::AlreadyExists,
            message: message.into(),
        }
    }

    /// A retryable failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: CreateErrorKind::Transient,
            message: message.into(),
        }
    }

    /// A non-retryable failure.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: CreateErrorKind::Fatal,
            message: message.into(),
        }
    }
}

/// Every failed attempt of one job's dispatch, in attempt order.
#[derive(Debug, Clone, Error)]
pub struct JobDispatchError {
    /// The job whose record could not be created.
    pub job: JobName,
    /// The record name that was being created.
    pub record: JobRecordName,
    /// One entry per failed attempt.
    pub attempts: Vec<CreateError>,
    /// `true` when shutdown interrupted the retry loop.
    pub cancelled: bool,
}

impl fmt::Display for JobDispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "creating job record {} for '{}' failed after {} attempt(s)",
            self.record,
            self.job,
            self.attempts.len()
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        let rendered: Vec<String> = self.attempts.iter().map(ToString::to_string).collect();
        write!(f, ": [{}]", rendered.join("; "))
    }
}

/// One or more jobs of a batch could not be dispatched.
#[derive(Debug, Clone, Error)]
pub struct DispatchAggregateError {
    /// Per-job failures, in dispatch order.
    pub failures: Vec<JobDispatchError>,
    /// Outcome of every job in the batch, failed or not, in dispatch order.
    pub outcomes: Vec<DispatchOutcome>,
}

impl DispatchAggregateError {
    /// Jobs of the batch whose records exist despite the failures.
    pub fn dispatched_jobs(&self) -> impl Iterator<Item = &JobName> {
        self.outcomes.iter().filter(|o| o.succeeded()).map(|o| &o.job)
    }
}

impl fmt::Display for DispatchAggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.failures.iter().map(ToString::to_string).collect();
        write!(
            f,
            "{} job(s) failed to dispatch: {}",
            self.failures.len(),
            rendered.join(", ")
        )
    }
}

// ---------------------------------------------------------------------------
// Pipeline-level errors
// ---------------------------------------------------------------------------

/// The single error value returned for one event.
///
/// None of these terminate the process; the caller logs them and moves on.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The trust collaborator errored; nothing was dispatched.
    #[error("could not check membership: {0}")]
    AuthorizationUnavailable(#[from] TrustError),

    /// Presubmits could not be resolved; nothing was dispatched.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// At least one job record could not be created.
    #[error(transparent)]
    Dispatch(#[from] DispatchAggregateError),

    /// The dispatcher configuration is invalid.
    ///
    /// Produced at construction time; an orchestrator never runs with an
    /// invalid configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

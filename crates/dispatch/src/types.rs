//! Shared value types for the dispatch domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types are the
//! records that flow through one pipeline run: the decoded [`ChangeEvent`], the
//! [`JobDefinition`] snapshot handed over by the job-config collaborator, and the
//! [`DispatchRequest`] / [`DispatchOutcome`] pair produced per eligible job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    BranchName, CommitSha, EventId, JobName, JobRecordName, OrgName, PullRequestNumber, RepoName,
    RepositoryId, UserLogin,
};

// ---------------------------------------------------------------------------
// Change events
// ---------------------------------------------------------------------------

/// The `action` of a `pull_request` webhook delivery.
///
/// Only the variants that can trigger a dispatch are modelled; everything else
/// is kept verbatim in [`PullRequestAction::Other`] for logging.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    /// A pull request was opened (possibly already as a draft).
    Opened,
    /// New commits were pushed to the pull request head.
    Synchronized,
    /// An existing pull request was converted to a draft.
    ConvertedToDraft,
    /// Any other action (`closed`, `labeled`, `ready_for_review`, ...).
    Other(String),
}

impl PullRequestAction {
    /// Maps GitHub's wire value to an action.
    pub fn from_wire(action: &str) -> Self {
        match action {
            "opened" => Self::Opened,
            "synchronize" => Self::Synchronized,
            "converted_to_draft" => Self::ConvertedToDraft,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns `true` for the actions that may (re)start draft presubmits.
    pub fn triggers_dispatch(&self) -> bool {
        matches!(
            self,
            Self::Opened | Self::Synchronized | Self::ConvertedToDraft
        )
    }
}

impl std::fmt::Display for PullRequestAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opened => write!(f, "opened"),
            Self::Synchronized => write!(f, "synchronize"),
            Self::ConvertedToDraft => write!(f, "converted_to_draft"),
            Self::Other(action) => write!(f, "{action}"),
        }
    }
}

/// A decoded pull-request change, immutable for the lifetime of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Organisation owning the base repository.
    pub org: OrgName,
    /// Base repository name.
    pub repo: RepoName,
    /// Owner login of the repository the event was delivered for.
    pub repo_owner: UserLogin,
    /// Author of the pull request.
    pub author: UserLogin,
    /// Branch the pull request targets.
    pub base_ref: BranchName,
    /// Current head commit of the pull request.
    pub head_sha: CommitSha,
    /// Pull request number.
    pub number: PullRequestNumber,
    /// What happened to the pull request.
    pub action: PullRequestAction,
    /// Whether the pull request is currently a draft.
    pub is_draft: bool,
    /// Correlation identifier of the webhook delivery.
    pub event_id: EventId,
    /// Browser link to the pull request, when the payload carried one.
    pub html_url: Option<String>,
}

impl ChangeEvent {
    /// The base repository as an `org/repo` identifier.
    pub fn repository(&self) -> RepositoryId {
        RepositoryId::new(self.org.clone(), self.repo.clone())
    }
}

// ---------------------------------------------------------------------------
// Job definitions
// ---------------------------------------------------------------------------

/// A presubmit job definition as resolved by the job-config collaborator.
///
/// The core only reads `name`; the trigger context and the opaque `spec` are
/// carried through to the created job record untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Job name, matched against the configured name pattern.
    pub name: JobName,
    /// Repository the definition was resolved for.
    pub repository: RepositoryId,
    /// Job body understood by the execution runtime.
    #[serde(default)]
    pub spec: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Trust
// ---------------------------------------------------------------------------

/// Whether an author's changes may run CI without manual approval.
///
/// Obtained once per event and never cached across events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustVerdict {
    /// `true` when the author is trusted.
    pub is_trusted: bool,
}

impl TrustVerdict {
    /// A verdict granting trust.
    pub const TRUSTED: Self = Self { is_trusted: true };
    /// A verdict withholding trust.
    pub const UNTRUSTED: Self = Self { is_trusted: false };
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// One job record submission, constructed immediately before it is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// Identity of the record; stable for a given delivery and job.
    pub record_name: JobRecordName,
    /// The job to create a record for.
    pub job: JobDefinition,
    /// The change that triggered it.
    pub event: ChangeEvent,
    /// Base commit, when the resolver needed it and it was looked up.
    pub base_sha: Option<CommitSha>,
    /// When the request was constructed.
    pub requested_at: DateTime<Utc>,
}

impl DispatchRequest {
    /// Builds the request for `job`, deriving its record name from the event.
    pub fn new(job: JobDefinition, event: ChangeEvent, base_sha: Option<CommitSha>) -> Self {
        Self {
            record_name: JobRecordName::derive(&event.event_id, &job.name),
            job,
            event,
            base_sha,
            requested_at: Utc::now(),
        }
    }

    /// Correlation identifier of the triggering delivery.
    pub fn event_id(&self) -> &EventId {
        &self.event.event_id
    }
}

/// How a successful dispatch was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRecordAck {
    /// The record was created by this dispatch.
    Created,
    /// A record with the same name already existed (an earlier attempt or
    /// delivery created it).
    AlreadyExisted,
}

/// Result of dispatching one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    /// The job that was dispatched.
    pub job: JobName,
    /// `Some` when the record exists, `None` when dispatch failed.
    pub ack: Option<JobRecordAck>,
    /// Rendered failure, when dispatch failed.
    pub error: Option<String>,
}

impl DispatchOutcome {
    /// Returns `true` when the job record exists.
    pub fn succeeded(&self) -> bool {
        self.ack.is_some()
    }
}

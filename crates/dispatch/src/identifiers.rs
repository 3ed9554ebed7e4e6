//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example,
//! an [`OrgName`] with a [`UserLogin`] even though both are strings under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers — GitHub-integer-backed
// ---------------------------------------------------------------------------

/// A pull request number within its repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PullRequestNumber(u64);

impl PullRequestNumber {
    /// Creates a new pull request number from a raw integer.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying integer value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PullRequestNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers — String-backed (GitHub names, configuration)
// ---------------------------------------------------------------------------

string_id! {
    /// A GitHub organisation (or user account) login owning a repository.
    OrgName
}

string_id! {
    /// A repository name without its owner (e.g. `"test-infra"`).
    RepoName
}

string_id! {
    /// A GitHub user login (e.g. `"alice"`).
    UserLogin
}

string_id! {
    /// A Git branch name (e.g. `"main"`), as it appears in a pull request's base ref.
    BranchName
}

string_id! {
    /// A Git commit SHA (40-character lowercase hex string).
    CommitSha
}

string_id! {
    /// The name of a presubmit job definition (e.g. `"pull-e2e-tests"`).
    JobName
}

string_id! {
    /// The scope job records are created in (e.g. a Kubernetes namespace).
    Namespace
}

string_id! {
    /// Opaque correlation identifier of one webhook delivery (`X-GitHub-Delivery`).
    ///
    /// GitHub reuses the identifier when it redelivers, which is what makes
    /// [`JobRecordName::derive`] stable across duplicate deliveries.
    EventId
}

/// Identifies a GitHub repository in `"org/repo"` format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryId {
    org: OrgName,
    repo: RepoName,
}

impl RepositoryId {
    /// Creates a repository identifier from its owner and name.
    pub fn new(org: OrgName, repo: RepoName) -> Self {
        Self { org, repo }
    }

    /// Parses an `"org/repo"` string, returning `None` unless both halves are non-empty.
    pub fn parse(value: &str) -> Option<Self> {
        let (org, repo) = value.split_once('/')?;
        if repo.contains('/') {
            return None;
        }
        Some(Self::new(OrgName::new(org)?, RepoName::new(repo)?))
    }

    /// The owning organisation.
    pub fn org(&self) -> &OrgName {
        &self.org
    }

    /// The repository name.
    pub fn repo(&self) -> &RepoName {
        &self.repo
    }
}

impl std::fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.org, self.repo)
    }
}

// ---------------------------------------------------------------------------
// Identifiers — UUID-backed (derived)
// ---------------------------------------------------------------------------

/// Namespace UUID under which job record names are derived.
const JOB_RECORD_NAMESPACE: Uuid = Uuid::from_u128(0x5d3c_1f0e_8a41_4c6b_9f27_2b8e_d0a4_71c3);

/// The caller-supplied identity of a job record.
///
/// The job store treats a second create with the same name as a duplicate,
/// so deriving the name deterministically from the delivery and the job is
/// what turns a retried or redelivered create into an "already exists".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobRecordName(Uuid);

impl JobRecordName {
    /// Derives the record name for `job` triggered by delivery `event`.
    pub fn derive(event: &EventId, job: &JobName) -> Self {
        let key = format!("{}/{}", event.as_str(), job.as_str());
        Self(Uuid::new_v5(&JOB_RECORD_NAMESPACE, key.as_bytes()))
    }
}

impl std::fmt::Display for JobRecordName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

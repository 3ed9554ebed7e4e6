//! Core dispatch domain for draft pull request presubmits.
//!
//! For each `pull_request` delivery this crate decides whether presubmit jobs
//! must be (re)started and creates one job record per eligible job, exactly
//! once, despite lost responses and duplicate deliveries. Infrastructure crates
//! implement the port traits defined here; they never add dispatch rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate performs no I/O of its
//! own. It defines *what* is needed from GitHub, the job-config service and the
//! job store; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`OrgName`, `JobName`, `JobRecordName`, ...) |
//! | [`types`] | Pipeline records (`ChangeEvent`, `JobDefinition`, `DispatchRequest`, ...) |
//! | [`errors`] | Per-port errors and the per-event [`DispatchError`] |
//! | [`decode`] | `pull_request` payload decoding |
//! | [`ports`] | Collaborator traits and the lazy [`LazySha`] getter |
//! | [`backoff`] | Generic bounded exponential backoff |
//! | [`filter`] | Job name pattern filter |
//! | [`dispatcher`] | Idempotent job record creation |
//! | [`orchestrator`] | The per-event pipeline |
//! | [`config`] | Read-only dispatcher configuration |

pub mod backoff;
pub mod config;
pub mod decode;
pub mod dispatcher;
pub mod errors;
pub mod filter;
pub mod identifiers;
pub mod orchestrator;
pub mod ports;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use backoff::{Attempt, BackoffConfig, BackoffError, Completion, GiveUpReason};
pub use config::DispatchConfig;
pub use decode::{decode_pull_request_event, PULL_REQUEST_EVENT};
pub use dispatcher::IdempotentDispatcher;
pub use errors::{
    CreateError, CreateErrorKind, DecodeError, DispatchAggregateError, DispatchError,
    JobDispatchError, RefLookupError, ResolutionError, TrustError,
};
pub use filter::JobNameFilter;
pub use identifiers::{
    BranchName, CommitSha, EventId, JobName, JobRecordName, Namespace, OrgName, PullRequestNumber,
    RepoName, RepositoryId, UserLogin,
};
pub use orchestrator::{
    Collaborators, DispatchOrchestrator, PipelineReport, PipelineStage, SkipReason,
};
pub use ports::{JobRecordStore, LazySha, PresubmitResolver, RefLookup, ShaFuture, TrustEvaluator};
pub use types::{
    ChangeEvent, DispatchOutcome, DispatchRequest, JobDefinition, JobRecordAck, PullRequestAction,
    TrustVerdict,
};

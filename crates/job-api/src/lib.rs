//! Draft dispatch job service adapter.
//!
//! Implements [`dispatch::PresubmitResolver`] and [`dispatch::JobRecordStore`]
//! over the job API, a JSON-over-HTTP service that owns presubmit job
//! configuration and the job records the execution runtime picks up.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** URL layout, the wire shape of job records, and the
//! mapping from HTTP status codes onto [`dispatch::CreateErrorKind`] live here.
//! The [`dispatch`] crate sees only the port traits.
//!
//! ## Endpoints
//!
//! | Call | Endpoint |
//! |------|----------|
//! | Resolve presubmits | `GET /repos/{org}/{repo}/presubmits[?base_sha=..&head_sha=..]` |
//! | Create job record | `POST /namespaces/{ns}/jobs` |
//!
//! Repositories that keep their job configuration in-tree need the commits the
//! configuration is read at, so only for those does the resolver force the
//! lazy SHA getters.
//!
//! [`DryRunJobStore`] stands in for the store when nothing should be created.

#![warn(missing_docs)]

mod client;
mod dry_run;
mod record;

pub use client::{classify_status, JobApiClient, JobApiError};
pub use dry_run::DryRunJobStore;
pub use record::{JobRecord, PullRef, TriggerRefs, PRESUBMIT_JOB_TYPE};

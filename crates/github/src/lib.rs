//! Draft dispatch GitHub infrastructure adapter.
//!
//! Implements the GitHub-facing ports defined in the [`dispatch`] crate
//! ([`dispatch::TrustEvaluator`], [`dispatch::RefLookup`]) over the GitHub REST
//! API using `reqwest`.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain dispatch rules.
//! Authentication, media types and status-code interpretation are handled
//! here; the [`dispatch`] crate never sees them.
//!
//! ## Trust
//!
//! An author is trusted when they are a member of the organisation the event
//! was delivered for or, when it differs, of the account owning the
//! repository. Membership is read from `GET /orgs/{org}/members/{user}`:
//! 204 member, 404 not a member, anything else (including 302) an error.

#![warn(missing_docs)]

mod client;

pub use client::{GitHubClient, GitHubClientError, DEFAULT_ENDPOINT};

//! Wire shape of a job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dispatch::{DispatchRequest, Namespace};

/// `type` of every record this service creates.
pub const PRESUBMIT_JOB_TYPE: &str = "presubmit";

/// A job record as posted to `POST /namespaces/{ns}/jobs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Deterministic record name; the job API rejects a second create with it.
    pub name: String,
    /// Namespace the record lives in.
    pub namespace: String,
    /// Record kind, [`PRESUBMIT_JOB_TYPE`] for everything created here.
    #[serde(rename = "type")]
    pub job_type: String,
    /// Name of the presubmit job to run.
    pub job: String,
    /// Job body from the presubmit definition, passed through untouched.
    #[serde(default)]
    pub spec: serde_json::Value,
    /// Base and pull request commits to check out.
    pub refs: TriggerRefs,
    /// Webhook delivery that caused the record to be created.
    pub event_id: String,
    /// When the dispatch was requested.
    pub created_at: DateTime<Utc>,
}

/// The code a presubmit runs against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRefs {
    /// Organisation owning the repository.
    pub org: String,
    /// Repository name.
    pub repo: String,
    /// Branch the pull request targets.
    pub base_ref: String,
    /// Commit of `base_ref`, when it was looked up for the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_sha: Option<String>,
    /// Always the single triggering pull request.
    pub pulls: Vec<PullRef>,
}

/// A pull request merged onto the base for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRef {
    /// Pull request number.
    pub number: u64,
    /// Login of the pull request author.
    pub author: String,
    /// Head commit of the pull request.
    pub sha: String,
    /// Web URL of the pull request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl JobRecord {
    /// Builds the record for `request` in `namespace`.
    pub fn from_request(namespace: &Namespace, request: &DispatchRequest) -> Self {
        let event = &request.event;
        Self {
            name: request.record_name.to_string(),
            namespace: namespace.to_string(),
            job_type: PRESUBMIT_JOB_TYPE.to_string(),
            job: request.job.name.to_string(),
            spec: request.job.spec.clone(),
            refs: TriggerRefs {
                org: event.org.to_string(),
                repo: event.repo.to_string(),
                base_ref: event.base_ref.to_string(),
                base_sha: request.base_sha.as_ref().map(ToString::to_string),
                pulls: vec![PullRef {
                    number: event.number.as_u64(),
                    author: event.author.to_string(),
                    sha: event.head_sha.to_string(),
                    link: event.html_url.clone(),
                }],
            },
            event_id: request.event_id().to_string(),
            created_at: request.requested_at,
        }
    }
}

//! Pull request webhook payload decoder.
//!
//! Turns the raw body of a `pull_request` delivery into a [`ChangeEvent`].
//! Unknown fields are ignored; the identity fields the pipeline keys on
//! (org, repo, author, base ref) must be present and non-empty.

use serde::Deserialize;

use crate::{
    BranchName, ChangeEvent, CommitSha, DecodeError, EventId, OrgName, PullRequestAction,
    PullRequestNumber, RepoName, UserLogin,
};

/// The `X-GitHub-Event` value this decoder accepts.
pub const PULL_REQUEST_EVENT: &str = "pull_request";

/// Decodes a `pull_request` delivery.
///
/// # Arguments
///
/// * `event_type` - The value of the `X-GitHub-Event` header
/// * `event_id` - The value of the `X-GitHub-Delivery` header
/// * `payload` - The raw JSON payload bytes
///
/// # Errors
///
/// [`DecodeError::UnsupportedEventType`] for any other event type,
/// [`DecodeError::Json`] for malformed JSON or a structurally missing object,
/// [`DecodeError::MissingField`] when an identity field is empty.
pub fn decode_pull_request_event(
    event_type: &str,
    event_id: EventId,
    payload: &[u8],
) -> Result<ChangeEvent, DecodeError> {
    if event_type != PULL_REQUEST_EVENT {
        return Err(DecodeError::UnsupportedEventType(event_type.to_string()));
    }

    let raw: RawPullRequestPayload = serde_json::from_slice(payload)?;
    let pr = raw.pull_request;

    // Identity comes from the base repository: for fork PRs the delivery's
    // repository is the base, but the head repository belongs to the fork.
    let org = OrgName::new(pr.base.repo.owner.login).ok_or(DecodeError::MissingField("org"))?;
    let repo = RepoName::new(pr.base.repo.name).ok_or(DecodeError::MissingField("repo"))?;
    let author = UserLogin::new(pr.user.login).ok_or(DecodeError::MissingField("author"))?;
    let base_ref = BranchName::new(pr.base.git_ref).ok_or(DecodeError::MissingField("ref"))?;
    let head_sha = CommitSha::new(pr.head.sha).ok_or(DecodeError::MissingField("head.sha"))?;
    let repo_owner = match raw.repository.and_then(|r| UserLogin::new(r.owner.login)) {
        Some(owner) => owner,
        None => UserLogin::new(org.as_str()).ok_or(DecodeError::MissingField("org"))?,
    };

    Ok(ChangeEvent {
        org,
        repo,
        repo_owner,
        author,
        base_ref,
        head_sha,
        number: PullRequestNumber::new(raw.number.unwrap_or(pr.number)),
        action: PullRequestAction::from_wire(&raw.action),
        is_draft: pr.draft.unwrap_or(false),
        event_id,
        html_url: pr.html_url,
    })
}

// ============================================================================
// Raw payload structures for deserialisation
//
// These match GitHub's webhook JSON structure; only the fields the pipeline
// reads are declared.
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawPullRequestPayload {
    action: String,
    number: Option<u64>,
    pull_request: RawPullRequest,
    repository: Option<RawRepository>,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: u64,
    draft: Option<bool>,
    html_url: Option<String>,
    user: RawUser,
    head: RawHead,
    base: RawBase,
}

#[derive(Debug, Deserialize)]
struct RawHead {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RawBase {
    #[serde(rename = "ref")]
    git_ref: String,
    repo: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    name: String,
    owner: RawUser,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_id() -> EventId {
        EventId::new("d7f1c1a0-0000-0000-0000-000000000001").unwrap()
    }

    fn payload(action: &str, draft: bool) -> serde_json::Value {
        json!({
            "action": action,
            "number": 42,
            "pull_request": {
                "number": 42,
                "draft": draft,
                "html_url": "https://github.com/k8s/test/pull/42",
                "user": { "login": "alice" },
                "head": { "sha": "0123456789abcdef0123456789abcdef01234567", "ref": "feature" },
                "base": {
                    "ref": "main",
                    "sha": "fedcba9876543210fedcba9876543210fedcba98",
                    "repo": { "name": "test", "owner": { "login": "k8s" } }
                }
            },
            "repository": { "name": "test", "owner": { "login": "k8s" } }
        })
    }

    fn decode(value: &serde_json::Value) -> Result<ChangeEvent, DecodeError> {
        let bytes = serde_json::to_vec(value).unwrap();
        decode_pull_request_event("pull_request", event_id(), &bytes)
    }

    #[test]
    fn decodes_converted_to_draft_event() {
        let event = decode(&payload("converted_to_draft", true)).unwrap();

        assert_eq!(event.org.as_str(), "k8s");
        assert_eq!(event.repo.as_str(), "test");
        assert_eq!(event.repo_owner.as_str(), "k8s");
        assert_eq!(event.author.as_str(), "alice");
        assert_eq!(event.base_ref.as_str(), "main");
        assert_eq!(event.head_sha.as_str(), "0123456789abcdef0123456789abcdef01234567");
        assert_eq!(event.number.as_u64(), 42);
        assert_eq!(event.action, PullRequestAction::ConvertedToDraft);
        assert!(event.is_draft);
        assert_eq!(event.event_id, event_id());
        assert_eq!(event.html_url.as_deref(), Some("https://github.com/k8s/test/pull/42"));
    }

    #[test]
    fn unknown_action_is_kept_verbatim() {
        let event = decode(&payload("labeled", false)).unwrap();
        assert_eq!(event.action, PullRequestAction::Other("labeled".into()));
        assert!(!event.is_draft);
    }

    #[test]
    fn missing_draft_flag_means_not_draft() {
        let mut value = payload("opened", true);
        value["pull_request"].as_object_mut().unwrap().remove("draft");
        assert!(!decode(&value).unwrap().is_draft);
    }

    #[test]
    fn rejects_other_event_types() {
        let bytes = serde_json::to_vec(&payload("opened", true)).unwrap();
        let err = decode_pull_request_event("issue_comment", event_id(), &bytes).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedEventType(t) if t == "issue_comment"));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = decode_pull_request_event("pull_request", event_id(), b"{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn rejects_payload_without_pull_request() {
        let err = decode(&json!({ "action": "opened" })).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn rejects_empty_identity_fields() {
        let cases = [
            ("/pull_request/base/repo/owner/login", "org"),
            ("/pull_request/base/repo/name", "repo"),
            ("/pull_request/user/login", "author"),
            ("/pull_request/base/ref", "ref"),
        ];
        for (pointer, field) in cases {
            let mut value = payload("opened", true);
            *value.pointer_mut(pointer).unwrap() = json!("");
            let err = decode(&value).unwrap_err();
            assert!(
                matches!(err, DecodeError::MissingField(f) if f == field),
                "expected missing {field}, got {err:?}"
            );
        }
    }

    #[test]
    fn repo_owner_falls_back_to_org_without_repository_object() {
        let mut value = payload("opened", true);
        value.as_object_mut().unwrap().remove("repository");
        assert_eq!(decode(&value).unwrap().repo_owner.as_str(), "k8s");
    }
}

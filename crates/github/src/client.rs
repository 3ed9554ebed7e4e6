//! `reqwest`-backed GitHub client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use dispatch::{
    CommitSha, OrgName, RefLookup, RefLookupError, RepoName, TrustError, TrustEvaluator,
    TrustVerdict, UserLogin,
};

/// Public GitHub API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.github.com";

const USER_AGENT: &str = "draft-dispatcher";
const ACCEPT: &str = "application/vnd.github+json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors talking to the GitHub API.
#[derive(Debug, Error)]
pub enum GitHubClientError {
    /// Transport failure or undecodable response body.
    #[error("GitHub request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// GitHub answered with a status the caller does not handle.
    #[error("GitHub API error (HTTP {status}) for {path}")]
    UnexpectedStatus {
        /// The HTTP status code.
        status: u16,
        /// The request path.
        path: String,
    },
}

/// GitHub REST client, safe to share across concurrent pipeline runs.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRef {
    object: RawRefObject,
}

#[derive(Debug, Deserialize)]
struct RawRefObject {
    sha: String,
}

impl GitHubClient {
    /// Creates a client for `endpoint` (e.g. [`DEFAULT_ENDPOINT`]), authenticating
    /// with `token` when given.
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Result<Self, GitHubClientError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            // A 302 from the membership endpoint is reported, never followed.
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{}", self.endpoint, path))
            .header(reqwest::header::ACCEPT, ACCEPT);
        match &self.token {
            Some(token) => builder.bearer_auth(token.trim()),
            None => builder,
        }
    }

    /// Returns whether `user` is a member of `org`.
    ///
    /// GitHub answers 302 when the token itself cannot see the organisation's
    /// members; that is an error, not a "no".
    pub async fn is_member(&self, org: &OrgName, user: &UserLogin) -> Result<bool, GitHubClientError> {
        let path = format!("/orgs/{org}/members/{user}");
        let response = self.request(Method::GET, &path).send().await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(GitHubClientError::UnexpectedStatus {
                status: status.as_u16(),
                path,
            }),
        }
    }

    /// Returns the commit `reference` (e.g. `heads/main`) points at.
    pub async fn get_ref(
        &self,
        org: &OrgName,
        repo: &RepoName,
        reference: &str,
    ) -> Result<String, GitHubClientError> {
        let path = format!("/repos/{org}/{repo}/git/ref/{reference}");
        let response = self.request(Method::GET, &path).send().await?;
        if response.status() != StatusCode::OK {
            return Err(GitHubClientError::UnexpectedStatus {
                status: response.status().as_u16(),
                path,
            });
        }
        let raw: RawRef = response.json().await?;
        Ok(raw.object.sha)
    }
}

#[async_trait]
impl TrustEvaluator for GitHubClient {
    async fn evaluate_trust(
        &self,
        org: &OrgName,
        repo: &RepoName,
        repo_owner: &UserLogin,
        author: &UserLogin,
    ) -> Result<TrustVerdict, TrustError> {
        let mut checked = vec![org.clone()];
        // A repository owned by a different account than the delivering org is
        // also checked against the owner's membership.
        if let Some(owner) = OrgName::new(repo_owner.as_str()).filter(|o| o != org) {
            checked.push(owner);
        }

        for candidate in &checked {
            let member = self
                .is_member(candidate, author)
                .await
                .map_err(|e| TrustError::new(e.to_string()))?;
            debug!(org = %candidate, repo = %repo, author = %author, member, "Checked organisation membership");
            if member {
                return Ok(TrustVerdict::TRUSTED);
            }
        }
        Ok(TrustVerdict::UNTRUSTED)
    }
}

#[async_trait]
impl RefLookup for GitHubClient {
    async fn get_ref(
        &self,
        org: &OrgName,
        repo: &RepoName,
        reference: &str,
    ) -> Result<CommitSha, RefLookupError> {
        let lookup_error = |message: String| RefLookupError {
            reference: reference.to_string(),
            message,
        };
        let sha = GitHubClient::get_ref(self, org, repo, reference)
            .await
            .map_err(|e| lookup_error(e.to_string()))?;
        CommitSha::new(sha).ok_or_else(|| lookup_error("empty SHA in response".to_string()))
    }
}

//! Command-line options.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, ValueEnum};

use dispatch::{DispatchConfig, RepositoryId};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable, multi-line output.
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Starts presubmit jobs for draft pull requests.
#[derive(Debug, Parser)]
#[command(name = "draft-dispatcher", version, about)]
pub struct Options {
    /// Port to listen on.
    #[arg(long, env = "DRAFT_DISPATCH_PORT", default_value_t = 8888)]
    pub port: u16,

    /// Path to the file containing the GitHub HMAC secret.
    #[arg(long, env = "DRAFT_DISPATCH_HMAC_SECRET_FILE", default_value = "/etc/hmac")]
    pub hmac_secret_file: PathBuf,

    /// Path to the file containing the GitHub API token.
    #[arg(long, env = "DRAFT_DISPATCH_GITHUB_TOKEN_FILE")]
    pub github_token_file: Option<PathBuf>,

    /// GitHub API base URL.
    #[arg(long, env = "DRAFT_DISPATCH_GITHUB_ENDPOINT", default_value = github::DEFAULT_ENDPOINT)]
    pub github_endpoint: String,

    /// Job API base URL.
    #[arg(long, env = "DRAFT_DISPATCH_JOB_API_ENDPOINT")]
    pub job_api_endpoint: String,

    /// Only jobs whose name matches this regular expression are started. Empty matches all.
    #[arg(long, env = "DRAFT_DISPATCH_REGEX", default_value = "")]
    pub regex: String,

    /// Namespace job records are created in.
    #[arg(long, env = "DRAFT_DISPATCH_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// `org/repo` whose job configuration lives in the repository. Repeatable.
    #[arg(long = "inrepo-config-repo", env = "DRAFT_DISPATCH_INREPO_CONFIG_REPOS", value_delimiter = ',')]
    pub inrepo_config_repos: Vec<String>,

    /// Log the job records instead of creating them.
    #[arg(long, env = "DRAFT_DISPATCH_DRY_RUN")]
    pub dry_run: bool,

    /// Log output format.
    #[arg(long, env = "DRAFT_DISPATCH_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// OTLP collector endpoint; traces are only exported when set.
    #[arg(long, env = "DRAFT_DISPATCH_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Seconds in-flight deliveries get to finish on shutdown.
    #[arg(long, env = "DRAFT_DISPATCH_GRACE_PERIOD_SECS", default_value_t = 5)]
    pub grace_period_secs: u64,
}

impl Options {
    /// Dispatch settings taken from the flags; the retry unit keeps its default.
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            name_pattern: self.regex.clone(),
            namespace: self.namespace.clone(),
            ..DispatchConfig::default()
        }
    }

    /// Parses the `org/repo` entries, skipping blanks.
    pub fn inrepo_config_repos(&self) -> anyhow::Result<Vec<RepositoryId>> {
        self.inrepo_config_repos
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| RepositoryId::parse(s).ok_or_else(|| anyhow!("invalid repository {s:?}, expected org/repo")))
            .collect()
    }

    /// Shutdown grace period for in-flight deliveries.
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Reads the webhook secret, trimmed. An empty file is an error.
    pub fn read_hmac_secret(&self) -> anyhow::Result<Vec<u8>> {
        let secret = read_secret(&self.hmac_secret_file)?;
        if secret.is_empty() {
            return Err(anyhow!("HMAC secret file {} is empty", self.hmac_secret_file.display()));
        }
        Ok(secret.into_bytes())
    }

    /// Reads the GitHub token, trimmed, when a token file is configured.
    pub fn read_github_token(&self) -> anyhow::Result<Option<String>> {
        self.github_token_file.as_deref().map(read_secret).transpose()
    }
}

fn read_secret(path: &std::path::Path) -> anyhow::Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read secret file {}", path.display()))?;
    Ok(raw.trim().to_string())
}

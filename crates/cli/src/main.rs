//! Draft dispatch entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse configuration**: [`options::Options`], from flags or
//!    `DRAFT_DISPATCH_*` environment variables, plus the secret files.
//! 2. **Wire observability**: `tracing-subscriber` with a pretty or JSON layer
//!    and, when configured, an OpenTelemetry OTLP exporter.
//! 3. **Construct infrastructure**: [`github::GitHubClient`],
//!    [`job_api::JobApiClient`] (or [`job_api::DryRunJobStore`]) injected into a
//!    [`dispatch::DispatchOrchestrator`].
//! 4. **Serve** the [`listener`] router until SIGINT or SIGTERM, then give
//!    in-flight deliveries the grace period to finish.

mod options;
mod telemetry;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use dispatch::{Collaborators, DispatchOrchestrator, JobRecordStore};
use github::GitHubClient;
use job_api::{DryRunJobStore, JobApiClient};
use listener::{build_router, AppState};

use crate::options::Options;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Options::parse();
    let provider = telemetry::init(opts.log_format, opts.otlp_endpoint.as_deref())?;

    let result = run(opts).await;

    if let Some(provider) = provider {
        if let Err(e) = provider.shutdown() {
            eprintln!("failed to flush traces: {e}");
        }
    }
    result
}

async fn run(opts: Options) -> anyhow::Result<()> {
    let secret = opts.read_hmac_secret()?;
    let token = opts.read_github_token()?;
    if token.is_none() {
        warn!("No GitHub token configured; API requests are unauthenticated");
    }

    let github = Arc::new(
        GitHubClient::new(opts.github_endpoint.clone(), token).context("failed to build GitHub client")?,
    );
    let job_api = Arc::new(
        JobApiClient::new(opts.job_api_endpoint.clone(), opts.inrepo_config_repos()?)
            .context("failed to build job API client")?,
    );
    let store: Arc<dyn JobRecordStore> = if opts.dry_run {
        info!("Dry run: job records will be logged, not created");
        Arc::new(DryRunJobStore)
    } else {
        job_api.clone()
    };

    let shutdown = CancellationToken::new();
    let orchestrator = DispatchOrchestrator::new(
        &opts.dispatch_config(),
        Collaborators {
            trust: github.clone(),
            refs: github,
            resolver: job_api,
            store,
        },
    )
    .context("invalid dispatch configuration")?
    .with_shutdown(shutdown.clone());

    let tasks = TaskTracker::new();
    let app = build_router(AppState::new(Arc::new(orchestrator), secret, tasks.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], opts.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, namespace = %opts.namespace, dry_run = opts.dry_run, "Starting server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!(in_flight = tasks.len(), "Server stopped accepting deliveries");
    tasks.close();
    let grace = opts.grace_period();
    if tokio::time::timeout(grace, tasks.wait()).await.is_err() {
        warn!(in_flight = tasks.len(), "Grace period elapsed, abandoning pending retries");
        shutdown.cancel();
        if tokio::time::timeout(grace, tasks.wait()).await.is_err() {
            warn!(in_flight = tasks.len(), "Exiting with deliveries still in flight");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, starting graceful shutdown"),
        () = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}

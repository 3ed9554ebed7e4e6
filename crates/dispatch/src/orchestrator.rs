//! The per-event dispatch pipeline.
//!
//! ```text
//! Received ─decode─▶ Decoded ─action/draft/trust─▶ Authorized ─resolve─▶ Resolved
//!     ─filter─▶ Dispatching ─create every job─▶ Done
//! ```
//!
//! Any gate that does not pass ends the run early. A failed decode, trust
//! check or resolution is an error; an ignored action, a ready-for-review PR,
//! an untrusted author, or an empty job set is a normal [`PipelineReport::Skipped`].
//!
//! The orchestrator holds no per-event state, so one instance serves any
//! number of concurrent runs.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::ports::ShaFuture;
use crate::{
    decode_pull_request_event, ChangeEvent, DispatchAggregateError, DispatchConfig, DispatchError,
    DispatchOutcome, DispatchRequest, EventId, IdempotentDispatcher, JobNameFilter, JobRecordStore,
    LazySha, PresubmitResolver, PullRequestAction, RefLookup, ResolutionError, TrustEvaluator,
};

/// Stages of one pipeline run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// A raw delivery arrived.
    Received,
    /// The payload decoded into a [`ChangeEvent`].
    Decoded,
    /// The action, draft state and author all allow dispatch.
    Authorized,
    /// Presubmits were resolved for the repository.
    Resolved,
    /// At least one presubmit passed the name filter.
    Dispatching,
    /// Every filtered presubmit was dispatched.
    Done,
}

/// Why a run ended without dispatching anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The action cannot trigger a dispatch.
    IgnoredAction(PullRequestAction),
    /// The pull request is not a draft.
    NotDraft,
    /// The author is not trusted.
    Untrusted,
    /// No presubmits are configured for the repository.
    NoPresubmits,
    /// No presubmit matched the name pattern.
    NoMatchingJobs,
}

impl SkipReason {
    /// The last stage reached before the run ended.
    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::IgnoredAction(_) | Self::NotDraft | Self::Untrusted => PipelineStage::Decoded,
            Self::NoPresubmits => PipelineStage::Authorized,
            Self::NoMatchingJobs => PipelineStage::Resolved,
        }
    }
}

/// Result of a run that did not fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineReport {
    /// A gate ended the run; nothing was dispatched.
    Skipped(SkipReason),
    /// Every filtered job record exists, in dispatch order.
    Dispatched(Vec<DispatchOutcome>),
}

impl PipelineReport {
    /// The last stage the run reached.
    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::Skipped(reason) => reason.stage(),
            Self::Dispatched(_) => PipelineStage::Done,
        }
    }
}

/// Collaborator handles the orchestrator is built from.
#[derive(Clone)]
pub struct Collaborators {
    /// Trust verdicts for authors.
    pub trust: Arc<dyn TrustEvaluator>,
    /// Remote ref lookup used for the lazy base SHA.
    pub refs: Arc<dyn RefLookup>,
    /// Presubmit definitions per repository.
    pub resolver: Arc<dyn PresubmitResolver>,
    /// Job record creation.
    pub store: Arc<dyn JobRecordStore>,
}

/// Sequences decode, authorisation, resolution, filtering and dispatch for one event.
pub struct DispatchOrchestrator {
    trust: Arc<dyn TrustEvaluator>,
    refs: Arc<dyn RefLookup>,
    resolver: Arc<dyn PresubmitResolver>,
    dispatcher: IdempotentDispatcher,
    filter: JobNameFilter,
}

impl DispatchOrchestrator {
    /// Builds an orchestrator, validating `config`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Configuration`] for an invalid name pattern, an
    /// empty namespace, or a retry base unit the backoff schedule overflows.
    pub fn new(config: &DispatchConfig, collaborators: Collaborators) -> Result<Self, DispatchError> {
        let filter = config.name_filter()?;
        let dispatcher =
            IdempotentDispatcher::new(collaborators.store, config.namespace()?, config.backoff()?);
        Ok(Self {
            trust: collaborators.trust,
            refs: collaborators.refs,
            resolver: collaborators.resolver,
            dispatcher,
            filter,
        })
    }

    /// Aborts pending dispatch retries once `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.dispatcher = self.dispatcher.with_shutdown(shutdown);
        self
    }

    /// Runs the pipeline for one raw delivery.
    ///
    /// # Errors
    ///
    /// See [`DispatchError`]; every variant is scoped to this event.
    pub async fn handle_event(
        &self,
        event_type: &str,
        event_id: EventId,
        payload: &[u8],
    ) -> Result<PipelineReport, DispatchError> {
        let span = info_span!("handle_event", event_type, event_id = %event_id);
        async move {
            debug!(stage = ?PipelineStage::Received, "Decoding delivery");
            let event = decode_pull_request_event(event_type, event_id, payload)?;
            self.handle_change(&event).await
        }
        .instrument(span)
        .await
    }

    /// Runs the pipeline from the `Decoded` stage.
    pub async fn handle_change(&self, event: &ChangeEvent) -> Result<PipelineReport, DispatchError> {
        let span = info_span!(
            "handle_change",
            org = %event.org,
            repo = %event.repo,
            pr = event.number.as_u64(),
            action = %event.action,
        );
        self.run(event).instrument(span).await
    }

    async fn run(&self, event: &ChangeEvent) -> Result<PipelineReport, DispatchError> {
        if !event.action.triggers_dispatch() {
            debug!("Skipping event with action {}", event.action);
            return Ok(PipelineReport::Skipped(SkipReason::IgnoredAction(
                event.action.clone(),
            )));
        }
        if !event.is_draft {
            debug!("Skipping pull request that is not a draft");
            return Ok(PipelineReport::Skipped(SkipReason::NotDraft));
        }

        let verdict = self
            .trust
            .evaluate_trust(&event.org, &event.repo, &event.repo_owner, &event.author)
            .await?;
        if !verdict.is_trusted {
            return Ok(PipelineReport::Skipped(SkipReason::Untrusted));
        }

        info!(
            stage = ?PipelineStage::Authorized,
            author = %event.author,
            sha = %event.head_sha,
            "PR info"
        );

        let base_sha = self.base_sha_getter(event);
        let head_sha = LazySha::ready(event.head_sha.clone());
        let presubmits = self
            .resolver
            .resolve_presubmits(&event.repository(), &base_sha, &head_sha)
            .await?;
        if presubmits.is_empty() {
            debug!("No presubmits configured");
            return Ok(PipelineReport::Skipped(SkipReason::NoPresubmits));
        }

        let resolved = presubmits.len();
        let jobs = self.filter.apply(presubmits);
        if jobs.is_empty() {
            debug!(
                resolved,
                pattern = self.filter.as_str(),
                "No presubmit matches the job name pattern"
            );
            return Ok(PipelineReport::Skipped(SkipReason::NoMatchingJobs));
        }

        debug!(stage = ?PipelineStage::Dispatching, jobs = jobs.len(), resolved, "Dispatching presubmits");
        let base_sha = base_sha.resolved().cloned();
        let mut outcomes = Vec::with_capacity(jobs.len());
        let mut failures = Vec::new();

        for job in jobs {
            info!(job = %job.name, "Starting {} build.", job.name);
            let request = DispatchRequest::new(job, event.clone(), base_sha.clone());
            info!(
                job = %request.job.name,
                record = %request.record_name,
                namespace = %self.dispatcher.namespace(),
                "Creating a new job record."
            );
            match self.dispatcher.dispatch(&request).await {
                Ok(ack) => outcomes.push(DispatchOutcome {
                    job: request.job.name,
                    ack: Some(ack),
                    error: None,
                }),
                Err(e) => {
                    error!(job = %request.job.name, error = %e, "Failed to create job record.");
                    outcomes.push(DispatchOutcome {
                        job: request.job.name,
                        ack: None,
                        error: Some(e.to_string()),
                    });
                    failures.push(e);
                }
            }
        }

        if failures.is_empty() {
            debug!(stage = ?PipelineStage::Done, "All presubmits dispatched");
            Ok(PipelineReport::Dispatched(outcomes))
        } else {
            Err(DispatchAggregateError { failures, outcomes }.into())
        }
    }

    /// Builds the lazy base SHA getter: `heads/<base ref>` is looked up on
    /// first use only.
    fn base_sha_getter(&self, event: &ChangeEvent) -> LazySha<'static> {
        let refs = Arc::clone(&self.refs);
        let org = event.org.clone();
        let repo = event.repo.clone();
        let reference = format!("heads/{}", event.base_ref);
        LazySha::new(move || -> ShaFuture<'static> {
            let refs = Arc::clone(&refs);
            let (org, repo, reference) = (org.clone(), repo.clone(), reference.clone());
            Box::pin(async move {
                debug!(reference = %reference, "Looking up base SHA");
                refs.get_ref(&org, &repo, &reference)
                    .await
                    .map_err(ResolutionError::from)
            })
        })
    }
}

impl std::fmt::Debug for DispatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchOrchestrator")
            .field("dispatcher", &self.dispatcher)
            .field("filter", &self.filter.as_str())
            .finish_non_exhaustive()
    }
}

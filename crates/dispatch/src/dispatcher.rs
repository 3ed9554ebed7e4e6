//! Idempotent job record creation.
//!
//! A create request may succeed on the server while its response is lost. The
//! retry that follows then collides with the record the lost attempt created;
//! that collision is reported as success, never retried and never surfaced as
//! a failure. Combined with record names derived from the delivery ID, this
//! keeps at most one record per (delivery, job) across retries and
//! redeliveries.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backoff::{
    retry_with_backoff, Attempt, BackoffConfig, BackoffError, Completion, GiveUpReason,
};
use crate::{
    CreateErrorKind, DispatchRequest, JobDispatchError, JobRecordAck, JobRecordStore, Namespace,
};

/// Submits [`DispatchRequest`]s to a [`JobRecordStore`] with bounded retry.
#[derive(Clone)]
pub struct IdempotentDispatcher {
    store: Arc<dyn JobRecordStore>,
    namespace: Namespace,
    backoff: BackoffConfig,
    shutdown: CancellationToken,
}

impl IdempotentDispatcher {
    /// Creates a dispatcher writing into `namespace`.
    pub fn new(store: Arc<dyn JobRecordStore>, namespace: Namespace, backoff: BackoffConfig) -> Self {
        Self {
            store,
            namespace,
            backoff,
            shutdown: CancellationToken::new(),
        }
    }

    /// Aborts pending retries once `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// The namespace records are created in.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Creates the job record for `request`.
    ///
    /// Returns [`JobRecordAck::AlreadyExisted`] when the store reports the
    /// record name as taken, on any attempt.
    ///
    /// # Errors
    ///
    /// A [`JobDispatchError`] carrying every failed attempt when the attempt
    /// budget is exhausted, the store rejects the request as fatal, or
    /// shutdown interrupts the backoff.
    pub async fn dispatch(&self, request: &DispatchRequest) -> Result<JobRecordAck, JobDispatchError> {
        let job = &request.job.name;
        let result = retry_with_backoff(&self.backoff, &self.shutdown, |attempt| async move {
            match self.store.create_job_record(&self.namespace, request).await {
                Ok(ack) => Attempt::Success(ack),
                Err(e) if e.kind == CreateErrorKind::AlreadyExists => {
                    debug!(job = %job, record = %request.record_name, attempt, "Job record already exists");
                    Attempt::AlreadyExists
                }
                Err(e) if e.kind.is_retryable() => {
                    warn!(job = %job, attempt, error = %e, "Transient failure creating job record");
                    Attempt::Retryable(e)
                }
                Err(e) => {
                    warn!(job = %job, attempt, error = %e, "Job record rejected");
                    Attempt::Fatal(e)
                }
            }
        })
        .await;

        match result {
            Ok(Completion::Success(ack)) => Ok(ack),
            Ok(Completion::AlreadyExists) => Ok(JobRecordAck::AlreadyExisted),
            Err(BackoffError { reason, errors }) => Err(JobDispatchError {
                job: job.clone(),
                record: request.record_name,
                attempts: errors,
                cancelled: reason == GiveUpReason::Cancelled,
            }),
        }
    }
}

impl std::fmt::Debug for IdempotentDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotentDispatcher")
            .field("namespace", &self.namespace)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{change_event, job, RecordingJobStore};
    use crate::{CreateError, PullRequestAction};
    use std::time::Duration;

    fn dispatcher(store: Arc<RecordingJobStore>) -> IdempotentDispatcher {
        IdempotentDispatcher::new(
            store,
            Namespace::new("default").unwrap(),
            BackoffConfig::job_creation(Duration::from_micros(1)),
        )
    }

    fn request(name: &str) -> DispatchRequest {
        DispatchRequest::new(
            job(name),
            change_event(PullRequestAction::ConvertedToDraft, true),
            None,
        )
    }

    #[tokio::test]
    async fn second_dispatch_of_same_request_reports_already_existed() {
        let store = Arc::new(RecordingJobStore::new());
        let dispatcher = dispatcher(Arc::clone(&store));
        let request = request("e2e-tests");

        assert_eq!(dispatcher.dispatch(&request).await.unwrap(), JobRecordAck::Created);
        assert_eq!(
            dispatcher.dispatch(&request).await.unwrap(),
            JobRecordAck::AlreadyExisted
        );
        assert_eq!(store.created().len(), 1);
        assert_eq!(store.attempts(), 2);
    }

    #[tokio::test]
    async fn already_exists_on_first_attempt_is_success_without_retry() {
        let store = Arc::new(RecordingJobStore::new());
        store.fail_next(CreateError::already_exists("jobs \"x\" already exists"));

        let ack = dispatcher(Arc::clone(&store)).dispatch(&request("e2e")).await.unwrap();

        assert_eq!(ack, JobRecordAck::AlreadyExisted);
        assert_eq!(store.attempts(), 1);
        assert!(store.created().is_empty());
    }

    #[tokio::test]
    async fn lost_response_then_retry_creates_one_record() {
        let store = Arc::new(RecordingJobStore::new());
        store.fail_next_after_commit(CreateError::transient("connection reset"));

        let ack = dispatcher(Arc::clone(&store)).dispatch(&request("e2e")).await.unwrap();

        assert_eq!(ack, JobRecordAck::AlreadyExisted);
        assert_eq!(store.created().len(), 1);
        assert_eq!(store.attempts(), 2);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let store = Arc::new(RecordingJobStore::new());
        store.fail_next(CreateError::transient("503"));
        store.fail_next(CreateError::transient("timeout"));

        let ack = dispatcher(Arc::clone(&store)).dispatch(&request("e2e")).await.unwrap();

        assert_eq!(ack, JobRecordAck::Created);
        assert_eq!(store.attempts(), 3);
    }

    #[tokio::test]
    async fn always_transient_store_yields_eight_recorded_failures() {
        let store = Arc::new(RecordingJobStore::always_failing(CreateError::transient(
            "apiserver unavailable",
        )));

        let err = dispatcher(Arc::clone(&store))
            .dispatch(&request("e2e"))
            .await
            .unwrap_err();

        assert_eq!(err.attempts.len(), 8);
        assert!(!err.cancelled);
        assert_eq!(err.job.as_str(), "e2e");
        assert_eq!(store.attempts(), 8);
        assert!(store.created().is_empty());
    }

    #[tokio::test]
    async fn fatal_failure_is_not_retried() {
        let store = Arc::new(RecordingJobStore::new());
        store.fail_next(CreateError::fatal("invalid job spec"));

        let err = dispatcher(Arc::clone(&store))
            .dispatch(&request("e2e"))
            .await
            .unwrap_err();

        assert_eq!(err.attempts.len(), 1);
        assert_eq!(store.attempts(), 1);
    }

    #[tokio::test]
    async fn shutdown_interrupts_backoff() {
        let store = Arc::new(RecordingJobStore::always_failing(CreateError::transient("down")));
        let shutdown = CancellationToken::new();
        let dispatcher = IdempotentDispatcher::new(
            Arc::clone(&store) as Arc<dyn JobRecordStore>,
            Namespace::new("default").unwrap(),
            BackoffConfig::default(),
        )
        .with_shutdown(shutdown.clone());
        shutdown.cancel();

        let err = dispatcher.dispatch(&request("e2e")).await.unwrap_err();

        assert!(err.cancelled);
        assert_eq!(err.attempts.len(), 1);
        assert_eq!(store.attempts(), 1);
    }
}

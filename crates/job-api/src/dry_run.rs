//! A job record store that creates nothing.

use async_trait::async_trait;
use tracing::info;

use dispatch::{CreateError, DispatchRequest, JobRecordAck, JobRecordStore, Namespace};

use crate::record::JobRecord;

/// Logs the record that would have been created and reports it as created.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunJobStore;

#[async_trait]
impl JobRecordStore for DryRunJobStore {
    async fn create_job_record(
        &self,
        namespace: &Namespace,
        request: &DispatchRequest,
    ) -> Result<JobRecordAck, CreateError> {
        let record = JobRecord::from_request(namespace, request);
        let body = serde_json::to_string(&record).unwrap_or_default();
        info!(
            job = %record.job,
            record = %record.name,
            namespace = %namespace,
            body = %body,
            "Dry run: not creating job record"
        );
        Ok(JobRecordAck::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch::test_utils::{change_event, job};
    use dispatch::PullRequestAction;

    #[tokio::test]
    async fn dry_run_acknowledges_every_create() {
        let store = DryRunJobStore;
        let request = DispatchRequest::new(
            job("unit-tests"),
            change_event(PullRequestAction::Opened, true),
            None,
        );
        let namespace = Namespace::new("default").unwrap();

        for _ in 0..2 {
            let ack = store.create_job_record(&namespace, &request).await.unwrap();
            assert_eq!(ack, JobRecordAck::Created);
        }
    }
}

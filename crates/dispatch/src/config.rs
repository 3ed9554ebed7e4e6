//! Dispatcher configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BackoffConfig, DispatchError, JobNameFilter, Namespace};

/// Read-only configuration shared by every pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Regular expression selecting which presubmits to dispatch. Empty matches all.
    pub name_pattern: String,

    /// Scope job records are created in.
    pub namespace: String,

    /// Unit the backoff schedule is expressed in (1 ms in production).
    pub retry_base_unit: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            name_pattern: String::new(),
            namespace: "default".to_string(),
            retry_base_unit: Duration::from_millis(1),
        }
    }
}

impl DispatchConfig {
    /// Compiles the name pattern.
    pub fn name_filter(&self) -> Result<JobNameFilter, DispatchError> {
        JobNameFilter::new(&self.name_pattern)
    }

    /// Validates the target namespace.
    pub fn namespace(&self) -> Result<Namespace, DispatchError> {
        Namespace::new(self.namespace.trim()).ok_or_else(|| DispatchError::Configuration {
            message: "namespace must not be empty".to_string(),
        })
    }

    /// The job-creation backoff schedule for the configured base unit.
    pub fn backoff(&self) -> Result<BackoffConfig, DispatchError> {
        BackoffConfig::checked_job_creation(self.retry_base_unit).ok_or_else(|| {
            DispatchError::Configuration {
                message: format!(
                    "retry_base_unit {:?} overflows the retry schedule",
                    self.retry_base_unit
                ),
            }
        })
    }
}

//! Job-name filtering.

use regex::Regex;

use crate::{DispatchError, JobDefinition};

/// Retains the job definitions whose name matches a configured pattern.
///
/// Matching is a search, not a full match: `e2e` matches `pull-e2e-gce`.
/// Anchor the pattern (`^e2e.*`) to restrict it. The empty pattern matches
/// every name.
#[derive(Debug, Clone)]
pub struct JobNameFilter {
    pattern: Option<Regex>,
}

impl JobNameFilter {
    /// Compiles `pattern`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Configuration`] when the pattern is not a valid regular expression.
    pub fn new(pattern: &str) -> Result<Self, DispatchError> {
        if pattern.is_empty() {
            return Ok(Self::match_all());
        }
        let regex = Regex::new(pattern).map_err(|e| DispatchError::Configuration {
            message: format!("invalid job name pattern '{pattern}': {e}"),
        })?;
        Ok(Self {
            pattern: Some(regex),
        })
    }

    /// A filter that keeps every job.
    pub fn match_all() -> Self {
        Self { pattern: None }
    }

    /// Returns `true` if `name` passes the filter.
    pub fn matches(&self, name: &str) -> bool {
        self.pattern.as_ref().is_none_or(|re| re.is_match(name))
    }

    /// Keeps exactly the matching definitions, in their original order.
    pub fn apply(&self, jobs: Vec<JobDefinition>) -> Vec<JobDefinition> {
        jobs.into_iter()
            .filter(|job| self.matches(job.name.as_str()))
            .collect()
    }

    /// The configured pattern, or `""` for the match-all filter.
    pub fn as_str(&self) -> &str {
        self.pattern.as_ref().map_or("", Regex::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobName, RepositoryId};
    use proptest::prelude::*;

    fn job(name: &str) -> JobDefinition {
        JobDefinition {
            name: JobName::new(name).unwrap(),
            repository: RepositoryId::parse("k8s/test").unwrap(),
            spec: serde_json::Value::Null,
        }
    }

    fn names(jobs: &[JobDefinition]) -> Vec<&str> {
        jobs.iter().map(|j| j.name.as_str()).collect()
    }

    #[test]
    fn empty_pattern_keeps_everything_in_order() {
        let filter = JobNameFilter::new("").unwrap();
        let kept = filter.apply(vec![job("unit-tests"), job("e2e-tests")]);
        assert_eq!(names(&kept), ["unit-tests", "e2e-tests"]);
        assert_eq!(filter.as_str(), "");
    }

    #[test]
    fn anchored_pattern_keeps_only_prefix_matches() {
        let filter = JobNameFilter::new("^e2e.*").unwrap();
        let kept = filter.apply(vec![job("unit-tests"), job("e2e-tests"), job("pull-e2e")]);
        assert_eq!(names(&kept), ["e2e-tests"]);
    }

    #[test]
    fn unanchored_pattern_matches_anywhere() {
        let filter = JobNameFilter::new("e2e").unwrap();
        assert!(filter.matches("pull-e2e-gce"));
        assert!(!filter.matches("unit"));
    }

    #[test]
    fn invalid_pattern_is_a_configuration_error() {
        let err = JobNameFilter::new("(unclosed").unwrap_err();
        assert!(matches!(err, DispatchError::Configuration { .. }));
    }

    proptest! {
        #[test]
        fn filtered_set_is_exactly_the_matching_subsequence(
            raw_names in proptest::collection::vec("[a-z0-9-]{1,12}", 0..16),
            pattern in prop_oneof![
                Just(String::new()),
                Just("^e2e".to_string()),
                Just("unit".to_string()),
                Just("[0-9]$".to_string()),
                Just("^(a|b)-".to_string()),
            ],
        ) {
            let filter = JobNameFilter::new(&pattern).unwrap();
            let regex = Regex::new(&pattern).unwrap();
            let jobs: Vec<_> = raw_names.iter().map(|n| job(n)).collect();

            let kept = filter.apply(jobs);
            let expected: Vec<&str> = raw_names
                .iter()
                .map(String::as_str)
                .filter(|n| regex.is_match(n))
                .collect();

            prop_assert_eq!(names(&kept), expected);
        }
    }
}

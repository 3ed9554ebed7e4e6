//! Bounded exponential backoff with outcome classification.
//!
//! [`retry_with_backoff`] drives an operation that reports one of four tagged
//! outcomes ([`Attempt`]). `Success` and `AlreadyExists` both end the loop
//! successfully; `Retryable` is recorded and retried after a jittered delay;
//! `Fatal` is recorded and ends the loop at once. When the attempt budget runs
//! out, or shutdown is requested between attempts, every recorded failure is
//! returned, not just the last one.
//!
//! The schedule used for job creation is 250 base units, doubling per attempt,
//! ±10 % jitter, at most 8 attempts.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Multiple of the base unit used as the first delay of the job-creation schedule.
pub const INITIAL_DELAY_UNITS: u32 = 250;

/// Attempt ceiling of the job-creation schedule.
pub const MAX_ATTEMPTS: u32 = 8;

/// Configuration for exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,

    /// Multiplier applied to the delay after each attempt.
    pub factor: f64,

    /// Fractional jitter applied to every delay (`0.1` means ±10 %).
    pub jitter: f64,

    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
}

impl BackoffConfig {
    /// Creates a new backoff configuration.
    pub fn new(initial_delay: Duration, factor: f64, jitter: f64, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            factor,
            jitter,
            max_attempts,
        }
    }

    /// The job-creation schedule, scaled by `base_unit` (1 ms in production).
    ///
    /// With the default unit the un-jittered delays are 250 ms, 500 ms, ...,
    /// 16 s: about 32 s of waiting across 8 attempts.
    ///
    /// Delays saturate at [`Duration::MAX`]; use [`Self::checked_job_creation`]
    /// to reject a unit the schedule cannot represent.
    pub fn job_creation(base_unit: Duration) -> Self {
        Self::new(base_unit.saturating_mul(INITIAL_DELAY_UNITS), 2.0, 0.1, MAX_ATTEMPTS)
    }

    /// Like [`Self::job_creation`], but `None` when any delay of the schedule,
    /// jitter included, or their sum would overflow a [`Duration`].
    pub fn checked_job_creation(base_unit: Duration) -> Option<Self> {
        let config = Self::new(base_unit.checked_mul(INITIAL_DELAY_UNITS)?, 2.0, 0.1, MAX_ATTEMPTS);
        let longest = config.initial_delay.as_secs_f64()
            * config.factor.powi(config.max_attempts.saturating_sub(1) as i32)
            * (1.0 + config.jitter);
        Duration::try_from_secs_f64(longest).ok()?;
        config
            .delays()
            .try_fold(Duration::ZERO, |total, delay| total.checked_add(delay))?;
        Some(config)
    }

    /// Computes the un-jittered delay after the given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.powi(attempt as i32);
        Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * multiplier)
            .unwrap_or(Duration::MAX)
    }

    /// Applies jitter to `delay`. `sample` is clamped to `[-1.0, 1.0]`.
    pub fn jittered(&self, delay: Duration, sample: f64) -> Duration {
        let scale = 1.0 + self.jitter * sample.clamp(-1.0, 1.0);
        Duration::try_from_secs_f64((delay.as_secs_f64() * scale).max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Returns an iterator over the un-jittered delays between attempts.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts.saturating_sub(1)).map(|attempt| self.delay_for_attempt(attempt))
    }

    /// Computes the total un-jittered wait when every attempt fails.
    pub fn total_max_wait(&self) -> Duration {
        self.delays().fold(Duration::ZERO, Duration::saturating_add)
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let sample = rand::rng().random_range(-1.0..=1.0);
        self.jittered(self.delay_for_attempt(attempt), sample)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::job_creation(Duration::from_millis(1))
    }
}

/// Outcome of one attempt, as classified by the operation itself.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// The operation succeeded.
    Success(T),
    /// The effect is already in place (e.g. an earlier attempt succeeded but
    /// its response was lost).
    AlreadyExists,
    /// Transient failure; try again.
    Retryable(E),
    /// Permanent failure; stop.
    Fatal(E),
}

/// How a successful retry loop finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<T> {
    /// An attempt succeeded.
    Success(T),
    /// An attempt found the effect already in place.
    AlreadyExists,
}

/// Why a retry loop gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// Every allowed attempt failed with a retryable error.
    Exhausted,
    /// An attempt failed with a fatal error.
    Fatal,
    /// Shutdown was requested between attempts.
    Cancelled,
}

/// A retry loop that gave up, with every recorded failure in attempt order.
#[derive(Debug)]
pub struct BackoffError<E> {
    /// Why the loop stopped.
    pub reason: GiveUpReason,
    /// One entry per failed attempt.
    pub errors: Vec<E>,
}

/// Executes an async operation with bounded exponential backoff.
///
/// # Arguments
///
/// * `config` - Delay schedule and attempt ceiling
/// * `cancel` - Checked while waiting between attempts; an in-flight attempt is
///   never interrupted
/// * `operation` - Called once per attempt with the 1-based attempt number
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: &BackoffConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<Completion<T>, BackoffError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut errors = Vec::new();

    for attempt in 1..=max_attempts {
        match operation(attempt).await {
            Attempt::Success(value) => return Ok(Completion::Success(value)),
            Attempt::AlreadyExists => return Ok(Completion::AlreadyExists),
            Attempt::Fatal(e) => {
                errors.push(e);
                return Err(BackoffError {
                    reason: GiveUpReason::Fatal,
                    errors,
                });
            }
            Attempt::Retryable(e) => errors.push(e),
        }

        if attempt == max_attempts {
            break;
        }

        let delay = config.next_delay(attempt - 1);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying after backoff");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(BackoffError {
                    reason: GiveUpReason::Cancelled,
                    errors,
                });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    Err(BackoffError {
        reason: GiveUpReason::Exhausted,
        errors,
    })
}

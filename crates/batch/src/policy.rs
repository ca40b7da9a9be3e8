//! Retry, backoff and skip policies, and the classifier that combines them.
//!
//! Retry and skip are orthogonal: an error may be retried until the retry
//! budget is exhausted, then skipped if its kind is also skippable, else the
//! step fails. Exceeding the skip limit is always fatal for the step.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use acadbatch_core::{BatchError, ErrorKind};

/// Exponential backoff: `min(initial * multiplier^(n-1), max)` for attempt `n`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(16),
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial_interval: Duration, multiplier: f64, max_interval: Duration) -> Self {
        Self {
            initial_interval,
            multiplier,
            max_interval,
        }
    }

    /// No waiting between attempts.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, 1.0, Duration::ZERO)
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ns = self.initial_interval.as_nanos() as f64;
        let max_ns = self.max_interval.as_nanos() as f64;

        // Exponents past ~1000 overflow to infinity anyway; clamp to keep powi sane.
        let exp = self.multiplier.powi(attempt.saturating_sub(1).min(1024) as i32);
        let raw = base_ns * exp;
        let delay_ns = if raw.is_finite() { raw.min(max_ns) } else { max_ns };

        Duration::from_nanos(delay_ns.max(0.0).round() as u64)
    }

    /// Delays for attempts `1..=attempts`.
    pub fn schedule(&self, attempts: u32) -> Vec<Duration> {
        (1..=attempts).map(|n| self.delay_for_attempt(n)).collect()
    }
}

fn default_retryable() -> BTreeSet<ErrorKind> {
    [
        ErrorKind::DatabaseTransient,
        ErrorKind::DatabaseDeadlock,
        ErrorKind::MessageBusUnavailable,
        ErrorKind::FilesystemIo,
    ]
    .into_iter()
    .collect()
}

fn default_skippable() -> BTreeSet<ErrorKind> {
    [ErrorKind::MalformedInput, ErrorKind::MissingOptionalField]
        .into_iter()
        .collect()
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first failure (0 = no retries)
    pub max_attempts: u32,
    /// Error kinds worth retrying
    pub retryable: BTreeSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retryable: default_retryable(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable.contains(&kind)
    }

    /// Check if more retries are allowed after `attempt` retries were made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Skip policy configuration. The limit is per step execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipPolicy {
    pub skip_limit: u64,
    pub skippable: BTreeSet<ErrorKind>,
}

impl Default for SkipPolicy {
    fn default() -> Self {
        Self {
            skip_limit: 10,
            skippable: default_skippable(),
        }
    }
}

impl SkipPolicy {
    /// A policy that never skips.
    pub fn no_skip() -> Self {
        Self {
            skip_limit: 0,
            ..Default::default()
        }
    }

    pub fn with_limit(skip_limit: u64) -> Self {
        Self {
            skip_limit,
            ..Default::default()
        }
    }

    pub fn is_skippable(&self, kind: ErrorKind) -> bool {
        self.skippable.contains(&kind)
    }

    /// Whether one more skip fits in the budget.
    pub fn has_budget(&self, skips_so_far: u64) -> bool {
        skips_so_far < self.skip_limit
    }
}

/// What to do with errors no policy names.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnclassifiedPolicy {
    /// Skip (bounded by the skip limit) and log a warning.
    #[default]
    Skip,
    /// Fail the step.
    Fail,
}

/// How an error kind is treated by a [`FaultTolerance`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Classification {
    Retryable,
    Skippable,
    Unclassified,
    Fatal,
}

/// Why a fault ended the step.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    Fatal,
    RetriesExhausted,
    SkipLimitExceeded,
    UnclassifiedRejected,
}

impl core::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            FailureCause::Fatal => "fatal error",
            FailureCause::RetriesExhausted => "retries exhausted",
            FailureCause::SkipLimitExceeded => "skip limit exceeded",
            FailureCause::UnclassifiedRejected => "unclassified error rejected by policy",
        };
        f.write_str(s)
    }
}

/// Outcome of classifying one failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultDecision {
    /// Wait `delay`, then repeat the unit of work; `attempt` is 1-indexed.
    Retry { attempt: u32, delay: Duration },
    /// Drop the offending item and consume one unit of skip budget.
    Skip,
    Fail(FailureCause),
}

/// Retry + backoff + skip policies applied together.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaultTolerance {
    pub retry: RetryPolicy,
    pub backoff: BackoffPolicy,
    pub skip: SkipPolicy,
    pub unclassified: UnclassifiedPolicy,
}

impl FaultTolerance {
    pub fn new(retry: RetryPolicy, backoff: BackoffPolicy, skip: SkipPolicy) -> Self {
        Self {
            retry,
            backoff,
            skip,
            unclassified: UnclassifiedPolicy::default(),
        }
    }

    /// Neither retry nor skip: every error fails the step.
    pub fn strict() -> Self {
        Self::new(RetryPolicy::no_retry(), BackoffPolicy::none(), SkipPolicy::no_skip())
    }

    pub fn with_unclassified(mut self, policy: UnclassifiedPolicy) -> Self {
        self.unclassified = policy;
        self
    }

    pub fn classify(&self, kind: ErrorKind) -> Classification {
        if kind == ErrorKind::Configuration {
            return Classification::Fatal;
        }
        if self.retry.is_retryable(kind) {
            return Classification::Retryable;
        }
        if self.skip.is_skippable(kind) {
            return Classification::Skippable;
        }
        Classification::Unclassified
    }

    /// Decide how to handle `err` given retries already made for the current
    /// unit of work and skips already consumed by the step.
    pub fn decide(&self, err: &BatchError, retries_so_far: u32, skips_so_far: u64) -> FaultDecision {
        let kind = err.kind();
        match self.classify(kind) {
            Classification::Fatal => FaultDecision::Fail(FailureCause::Fatal),
            Classification::Retryable if self.retry.should_retry(retries_so_far) => {
                let attempt = retries_so_far + 1;
                FaultDecision::Retry {
                    attempt,
                    delay: self.backoff.delay_for_attempt(attempt),
                }
            }
            Classification::Retryable => {
                if self.skip.is_skippable(kind) {
                    self.try_skip(skips_so_far)
                } else {
                    FaultDecision::Fail(FailureCause::RetriesExhausted)
                }
            }
            Classification::Skippable => self.try_skip(skips_so_far),
            Classification::Unclassified => match self.unclassified {
                UnclassifiedPolicy::Skip => {
                    warn!(kind = %kind, error = %err, "unclassified error treated as skippable");
                    self.try_skip(skips_so_far)
                }
                UnclassifiedPolicy::Fail => FaultDecision::Fail(FailureCause::UnclassifiedRejected),
            },
        }
    }

    /// Decide for a unit of work that cannot be repeated, such as a record a
    /// forward-only cursor has already moved past. Retryable errors are charged
    /// to the skip budget instead; this never returns [`FaultDecision::Retry`].
    pub fn decide_unrepeatable(&self, err: &BatchError, skips_so_far: u64) -> FaultDecision {
        match self.classify(err.kind()) {
            Classification::Retryable | Classification::Skippable => self.try_skip(skips_so_far),
            Classification::Fatal | Classification::Unclassified => self.decide(err, 0, skips_so_far),
        }
    }

    fn try_skip(&self, skips_so_far: u64) -> FaultDecision {
        if self.skip.has_budget(skips_so_far) {
            FaultDecision::Skip
        } else {
            FaultDecision::Fail(FailureCause::SkipLimitExceeded)
        }
    }
}

/// Blocking wait used between retries; swapped out in tests.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the calling worker thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Records requested delays instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.slept.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(duration);
    }
}

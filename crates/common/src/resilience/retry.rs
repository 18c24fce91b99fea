//! Retry executor with bounded exponential backoff
//!
//! Only failures whose classification is retryable are retried. The delay
//! before retry `i` (0-based) is `min(base_delay * backoff_factor^i,
//! max_delay)`. When the budget runs out the caller gets the last error.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::audit::{AuditEntry, AuditEvent, AuditLevel, SharedAuditSink};
use crate::config::{ConfigError, ConfigResult};
use crate::error::{DatabaseError, DatabaseResult, ErrorClassification};

/// Retry budget and backoff shape
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` means exactly one attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::invalid("backoff_factor must be a finite number >= 1"));
        }
        if self.base_delay > self.max_delay {
            return Err(ConfigError::invalid("base_delay must not exceed max_delay"));
        }
        Ok(())
    }

    /// Delay slept before retry number `retry` (0-based)
    ///
    /// Computed in nanoseconds so sub-millisecond bases keep their precision.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let max_nanos = self.max_delay.as_nanos() as f64;
        let delay_nanos =
            (self.base_delay.as_nanos() as f64 * self.backoff_factor.powi(exponent)).round();
        // Also catches an infinite product
        if delay_nanos >= max_nanos {
            return self.max_delay;
        }
        Duration::from_nanos(delay_nanos as u64)
    }

    /// Total attempts this policy allows
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Builder for RetryPolicy with fluent API
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self { policy: RetryPolicy::default() }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.policy.max_retries = retries;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.policy.backoff_factor = factor;
        self
    }

    pub fn build(self) -> ConfigResult<RetryPolicy> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}

/// Outcome of a retry execution including attempt statistics
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: DatabaseResult<T>,
    pub attempts: u32,
    /// Delays actually slept, in order
    pub delays: Vec<Duration>,
}

impl<T> RetryOutcome<T> {
    /// Consume the outcome and return only the result.
    pub fn into_result(self) -> DatabaseResult<T> {
        self.result
    }

    pub fn total_delay(&self) -> Duration {
        self.delays.iter().sum()
    }
}

enum Step {
    Stop,
    Retry(Duration),
}

/// Runs an operation until it succeeds, fails non-retryably, or the budget
/// is spent
#[derive(Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    sink: Option<SharedAuditSink>,
    cancellation: Option<CancellationToken>,
    label: Option<String>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("has_sink", &self.sink.is_some())
            .field("cancellable", &self.cancellation.is_some())
            .field("label", &self.label)
            .finish()
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, sink: None, cancellation: None, label: None }
    }

    pub fn with_sink(mut self, sink: SharedAuditSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Abort between attempts once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Name used in log lines and audit entries
    pub fn with_label<S: Into<String>>(mut self, label: S) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute an async operation with retry logic
    pub async fn execute<F, Fut, T>(&self, operation: F) -> DatabaseResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DatabaseResult<T>>,
    {
        self.execute_with_outcome(operation).await.into_result()
    }

    /// Execute an async operation with retry logic and return attempt
    /// statistics.
    #[instrument(
        skip(self, operation),
        fields(max_retries = self.policy.max_retries, label = self.label.as_deref())
    )]
    pub async fn execute_with_outcome<F, Fut, T>(&self, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DatabaseResult<T>>,
    {
        let mut delays = Vec::new();
        let mut attempts = 0;

        loop {
            if self.is_cancelled() {
                return self.cancelled(attempts, delays);
            }

            attempts += 1;
            debug!(attempt = attempts, max_attempts = self.policy.max_attempts(), "Executing operation");

            let error = match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(attempts, "Operation succeeded after retries");
                    }
                    return RetryOutcome { result: Ok(value), attempts, delays };
                }
                Err(error) => error,
            };

            let delay = match self.next_step(&error, attempts) {
                Step::Stop => return RetryOutcome { result: Err(error), attempts, delays },
                Step::Retry(delay) => delay,
            };
            delays.push(delay);

            match &self.cancellation {
                Some(token) => {
                    tokio::select! {
                        () = token.cancelled() => return self.cancelled(attempts, delays),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }

    /// Synchronous variant; sleeps the calling thread between attempts
    #[instrument(
        skip(self, operation),
        fields(max_retries = self.policy.max_retries, label = self.label.as_deref())
    )]
    pub fn execute_blocking<F, T>(&self, mut operation: F) -> DatabaseResult<T>
    where
        F: FnMut() -> DatabaseResult<T>,
    {
        let mut attempts = 0;

        loop {
            if self.is_cancelled() {
                return Err(DatabaseError::Cancelled { attempts });
            }

            attempts += 1;
            let error = match operation() {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match self.next_step(&error, attempts) {
                Step::Stop => return Err(error),
                Step::Retry(delay) => std::thread::sleep(delay),
            }
        }
    }

    /// Decide whether to retry after a failed attempt, logging the decision
    fn next_step(&self, error: &DatabaseError, attempts: u32) -> Step {
        let classification = error.classification();

        if !classification.retryable {
            debug!(
                attempt = attempts,
                kind = %classification.kind,
                code = classification.code,
                "Non-retryable failure, giving up"
            );
            return Step::Stop;
        }

        let retries_used = attempts - 1;
        if retries_used >= self.policy.max_retries {
            warn!(
                attempts,
                kind = %classification.kind,
                code = classification.code,
                "All retry attempts exhausted"
            );
            return Step::Stop;
        }

        let delay = self.policy.delay_for(retries_used);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        warn!(
            attempt = attempts,
            delay_ms,
            kind = %classification.kind,
            code = classification.code,
            "Operation failed, retrying"
        );

        if let Some(sink) = &self.sink {
            let message = match &self.label {
                Some(label) => format!("{label}: attempt {attempts} failed, retrying in {delay_ms}ms"),
                None => format!("attempt {attempts} failed, retrying in {delay_ms}ms"),
            };
            sink.record(
                &AuditEntry::new(AuditLevel::Warn, AuditEvent::RetryScheduled, message)
                    .with_classification(&classification)
                    .with_attempt(attempts)
                    .with_delay_ms(delay_ms),
            );
        }

        Step::Retry(delay)
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    fn cancelled<T>(&self, attempts: u32, delays: Vec<Duration>) -> RetryOutcome<T> {
        debug!(attempts, "Retry loop cancelled");
        RetryOutcome { result: Err(DatabaseError::Cancelled { attempts }), attempts, delays }
    }
}

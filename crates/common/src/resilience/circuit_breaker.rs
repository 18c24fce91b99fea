//! Circuit breaker guarding one dependency
//!
//! State lives behind a single mutex. Admission (the open check plus any
//! `Open -> HalfOpen` transition) and outcome recording are each one critical
//! section; the guarded operation itself runs with the lock released.
//!
//! ```text
//! Closed   --failures >= threshold-->  Open
//! Open     --recovery timeout-->       HalfOpen (checked lazily on admission)
//! HalfOpen --trial succeeds-->         Closed
//! HalfOpen --trial fails-->            Open
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::audit::{AuditEntry, AuditEvent, AuditLevel, SharedAuditSink};
use crate::config::{ConfigError, ConfigResult};
use crate::error::{CircuitOpenError, DatabaseError};

//==============================================================================
// Time Abstraction for Testability
//==============================================================================

/// Source of monotonic time for recovery timeouts
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Mock clock for deterministic testing
///
/// Clones share the same elapsed time, so a test can keep one handle and
/// hand another to the breaker.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock()
    }
}

//==============================================================================
// Error Types
//==============================================================================

/// Outcome of a guarded call that did not succeed
#[derive(Debug, Error)]
pub enum CircuitError<E>
where
    E: std::error::Error + 'static,
{
    /// The breaker rejected the call without invoking the operation
    #[error(transparent)]
    Open(#[from] CircuitOpenError),

    /// The operation ran and failed
    #[error(transparent)]
    Failed(E),
}

impl<E> CircuitError<E>
where
    E: std::error::Error + 'static,
{
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }
}

impl From<CircuitError<DatabaseError>> for DatabaseError {
    fn from(err: CircuitError<DatabaseError>) -> Self {
        match err {
            CircuitError::Open(open) => DatabaseError::CircuitOpen(open),
            CircuitError::Failed(inner) => inner,
        }
    }
}

//==============================================================================
// Configuration
//==============================================================================

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected until the recovery timeout elapses
    Open,
    /// One trial call is probing recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failed calls while closed before the circuit opens
    pub failure_threshold: u64,
    /// Time the circuit stays open before admitting a trial call
    pub recovery_timeout: Duration,
    /// Clear the failure count on every success while closed
    pub reset_on_success: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            reset_on_success: false,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }
        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::invalid("recovery_timeout must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn reset_on_success(mut self, reset: bool) -> Self {
        self.config.reset_on_success = reset;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u64,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub last_failure_time: Option<Instant>,
    pub state_change_time: Instant,
}

//==============================================================================
// Circuit Breaker
//==============================================================================

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u64,
    last_failure_time: Option<Instant>,
    trial_in_flight: bool,
    total_calls: u64,
    rejected_calls: u64,
    state_change_time: Instant,
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: CircuitState,
    to: CircuitState,
    failure_count: u64,
}

impl BreakerInner {
    fn transition(&mut self, to: CircuitState, now: Instant) -> Option<Transition> {
        if self.state == to {
            return None;
        }
        let from = self.state;
        self.state = to;
        self.state_change_time = now;
        if to == CircuitState::Closed {
            self.failure_count = 0;
        }
        Some(Transition { from, to, failure_count: self.failure_count })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermitKind {
    Normal,
    Trial,
}

/// Admission to run one guarded call
///
/// Dropping a trial permit without recording an outcome frees the half-open
/// slot so a cancelled trial cannot wedge the breaker.
#[must_use]
struct CallPermit<'a, C: Clock> {
    breaker: &'a CircuitBreaker<C>,
    kind: PermitKind,
    settled: bool,
}

impl<C: Clock> CallPermit<'_, C> {
    fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.kind);
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.kind);
    }
}

impl<C: Clock> Drop for CallPermit<'_, C> {
    fn drop(&mut self) {
        if !self.settled && self.kind == PermitKind::Trial {
            self.breaker.inner.lock().trial_in_flight = false;
        }
    }
}

/// Circuit breaker for one named dependency
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    clock: C,
    sink: Option<SharedAuditSink>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker using the system clock
    pub fn new<S: Into<String>>(name: S, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock (useful for testing)
    pub fn with_clock<S: Into<String>>(
        name: S,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let now = clock.now();
        Ok(Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                trial_in_flight: false,
                total_calls: 0,
                rejected_calls: 0,
                state_change_time: now,
            }),
            clock,
            sink: None,
        })
    }

    /// Record state transitions to an audit sink
    pub fn with_sink(mut self, sink: SharedAuditSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an async operation with circuit breaker protection
    ///
    /// Returns [`CircuitError::Open`] without polling `operation` when the
    /// circuit rejects the call.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        self.execute_with(operation, |_| true).await
    }

    /// Like [`execute`](Self::execute), but errors for which
    /// `counts_as_failure` returns `false` leave the breaker untouched
    ///
    /// Such a call settles as neither success nor failure. A half-open trial
    /// that ends this way frees its slot and the circuit stays half-open.
    #[instrument(skip(self, operation, counts_as_failure), fields(circuit = %self.name))]
    pub async fn execute_with<F, Fut, T, E, P>(
        &self,
        operation: F,
        counts_as_failure: P,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
        P: Fn(&E) -> bool,
    {
        let permit = self.acquire()?;
        let result = operation().await;
        self.settle(permit, result, counts_as_failure)
    }

    /// Execute a synchronous operation with circuit breaker protection
    pub fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + 'static,
    {
        self.call_with(operation, |_| true)
    }

    /// Synchronous counterpart of [`execute_with`](Self::execute_with)
    #[instrument(skip(self, operation, counts_as_failure), fields(circuit = %self.name))]
    pub fn call_with<F, T, E, P>(&self, operation: F, counts_as_failure: P) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + 'static,
        P: Fn(&E) -> bool,
    {
        let permit = self.acquire()?;
        let result = operation();
        self.settle(permit, result, counts_as_failure)
    }

    fn settle<T, E, P>(
        &self,
        permit: CallPermit<'_, C>,
        result: Result<T, E>,
        counts_as_failure: P,
    ) -> Result<T, CircuitError<E>>
    where
        E: std::error::Error + 'static,
        P: Fn(&E) -> bool,
    {
        match result {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(error) if counts_as_failure(&error) => {
                permit.failure();
                Err(CircuitError::Failed(error))
            }
            Err(error) => {
                debug!(circuit = %self.name, "Failure not counted against circuit");
                // Unsettled permit frees a trial slot on drop
                drop(permit);
                Err(CircuitError::Failed(error))
            }
        }
    }

    fn acquire(&self) -> Result<CallPermit<'_, C>, CircuitOpenError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let (kind, transition) = match inner.state {
            CircuitState::Closed => (PermitKind::Normal, None),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map_or(self.config.recovery_timeout, |t| now.saturating_duration_since(t));
                if elapsed < self.config.recovery_timeout {
                    inner.rejected_calls += 1;
                    drop(inner);
                    debug!(circuit = %self.name, "Circuit open, rejecting call");
                    return Err(CircuitOpenError::new(
                        self.name.clone(),
                        Some(self.config.recovery_timeout - elapsed),
                    ));
                }
                let transition = inner.transition(CircuitState::HalfOpen, now);
                inner.trial_in_flight = true;
                (PermitKind::Trial, transition)
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.rejected_calls += 1;
                    drop(inner);
                    debug!(circuit = %self.name, "Trial call in flight, rejecting call");
                    return Err(CircuitOpenError::new(self.name.clone(), None));
                }
                inner.trial_in_flight = true;
                (PermitKind::Trial, None)
            }
        };
        inner.total_calls += 1;
        drop(inner);

        if let Some(transition) = transition {
            self.emit(transition);
        }
        Ok(CallPermit { breaker: self, kind, settled: false })
    }

    fn on_success(&self, kind: PermitKind) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let transition = match (inner.state, kind) {
            (CircuitState::HalfOpen, PermitKind::Trial) => {
                inner.trial_in_flight = false;
                inner.transition(CircuitState::Closed, now)
            }
            (CircuitState::Closed, _) => {
                if self.config.reset_on_success {
                    inner.failure_count = 0;
                }
                None
            }
            // Late result of a call admitted before the circuit opened
            _ => None,
        };
        drop(inner);

        if let Some(transition) = transition {
            self.emit(transition);
        }
    }

    fn on_failure(&self, kind: PermitKind) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        let transition = match (inner.state, kind) {
            (CircuitState::Closed, _) => {
                inner.last_failure_time = Some(now);
                if inner.failure_count >= self.config.failure_threshold {
                    inner.transition(CircuitState::Open, now)
                } else {
                    None
                }
            }
            (CircuitState::HalfOpen, PermitKind::Trial) => {
                inner.trial_in_flight = false;
                inner.last_failure_time = Some(now);
                inner.transition(CircuitState::Open, now)
            }
            // Late result of a call admitted before the circuit opened
            _ => None,
        };
        drop(inner);

        if let Some(transition) = transition {
            self.emit(transition);
        }
    }

    fn emit(&self, transition: Transition) {
        let Transition { from, to, failure_count } = transition;
        let level = match to {
            CircuitState::Open => {
                warn!(circuit = %self.name, %from, %to, failure_count, "Circuit breaker opened");
                AuditLevel::Warn
            }
            CircuitState::HalfOpen => {
                info!(circuit = %self.name, %from, %to, "Circuit breaker probing recovery");
                AuditLevel::Info
            }
            CircuitState::Closed => {
                info!(circuit = %self.name, %from, %to, "Circuit breaker closed");
                AuditLevel::Info
            }
        };

        if let Some(sink) = &self.sink {
            sink.record(
                &AuditEntry::new(
                    level,
                    AuditEvent::CircuitTransition,
                    format!("circuit '{}' {} -> {}", self.name, from, to),
                )
                .with_circuit(self.name.clone(), to),
            );
        }
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Failed calls counted toward the threshold
    pub fn failure_count(&self) -> u64 {
        self.inner.lock().failure_count
    }

    /// Get circuit breaker metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
            last_failure_time: inner.last_failure_time,
            state_change_time: inner.state_change_time,
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let transition = inner.transition(CircuitState::Closed, now);
        inner.failure_count = 0;
        inner.last_failure_time = None;
        inner.trial_in_flight = false;
        drop(inner);

        info!(circuit = %self.name, "Circuit breaker manually reset to closed state");
        if let Some(transition) = transition {
            self.emit(transition);
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the circuit breaker
    //!
    //! Tests cover configuration validation, state transitions driven by a
    //! mock clock, half-open trial admission and concurrent access.

    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::audit::MemoryAuditSink;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    fn breaker(threshold: u64, timeout: Duration) -> (CircuitBreaker<MockClock>, MockClock) {
        let clock = MockClock::new();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(threshold)
            .recovery_timeout(timeout)
            .build()
            .unwrap();
        (CircuitBreaker::with_clock("primary-db", config, clock.clone()).unwrap(), clock)
    }

    fn fail(cb: &CircuitBreaker<MockClock>) -> CircuitError<Boom> {
        cb.call(|| Err::<(), _>(Boom)).unwrap_err()
    }

    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(5));
        clock.advance_millis(500);
        assert_eq!(clock.now().duration_since(start), Duration::from_millis(5500));

        let shared = clock.clone();
        shared.advance(Duration::from_secs(1));
        assert_eq!(clock.elapsed(), Duration::from_millis(6500));
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
    }

    /// Validates `CircuitBreakerConfig::default` and builder validation.
    ///
    /// Assertions:
    /// - Defaults are threshold 5, 60s recovery, no reset on success.
    /// - A zero threshold or zero recovery timeout is rejected.
    #[test]
    fn test_config_defaults_and_validation() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.recovery_timeout, Duration::from_secs(60));
        assert!(!config.reset_on_success);
        assert!(config.validate().is_ok());

        assert!(CircuitBreakerConfig::builder().failure_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().recovery_timeout(Duration::ZERO).build().is_err());
    }

    /// Errors excluded by the predicate settle as neither outcome.
    ///
    /// Assertions:
    /// - Excluded failures never reach the threshold while Closed.
    /// - An excluded half-open trial frees the slot without reopening.
    #[test]
    fn test_excluded_failures_leave_breaker_untouched() {
        let (cb, clock) = breaker(2, Duration::from_secs(10));
        let ignore = |_: &Boom| false;

        for _ in 0..2 {
            let result = cb.call_with(|| Err::<(), _>(Boom), ignore);
            assert!(matches!(result, Err(CircuitError::Failed(Boom))));
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);

        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(10));
        let _ = cb.call_with(|| Err::<(), _>(Boom), ignore);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.call(|| Ok::<_, Boom>(())).unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_opens_at_threshold() {
        let (cb, _clock) = breaker(3, Duration::from_secs(30));
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 2);

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_open_circuit_does_not_invoke_operation() {
        let (cb, _clock) = breaker(1, Duration::from_secs(30));
        fail(&cb);

        let invoked = AtomicU32::new(0);
        let result = cb.call(|| {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Boom>(())
        });

        let err = result.unwrap_err();
        assert!(err.is_open());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(cb.metrics().rejected_calls, 1);
    }

    #[test]
    fn test_open_error_reports_remaining_time() {
        let (cb, clock) = breaker(1, Duration::from_secs(30));
        fail(&cb);
        clock.advance(Duration::from_secs(10));

        match cb.call(|| Ok::<_, Boom>(())) {
            Err(CircuitError::Open(open)) => {
                assert_eq!(open.circuit, "primary-db");
                assert_eq!(open.retry_after, Some(Duration::from_secs(20)));
            }
            other => panic!("expected open circuit, got {other:?}"),
        }
    }

    #[test]
    fn test_half_open_trial_success_closes() {
        let (cb, clock) = breaker(2, Duration::from_secs(30));
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(30));
        let result = cb.call(|| Ok::<_, Boom>("recovered"));
        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_half_open_trial_failure_reopens_with_fresh_timer() {
        let (cb, clock) = breaker(1, Duration::from_secs(30));
        fail(&cb);
        clock.advance(Duration::from_secs(31));

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        // Timer restarted at the trial failure, not the original one
        clock.advance(Duration::from_secs(29));
        assert!(cb.call(|| Ok::<_, Boom>(())).unwrap_err().is_open());

        clock.advance(Duration::from_secs(1));
        assert!(cb.call(|| Ok::<_, Boom>(())).is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_admits_single_trial() {
        let (cb, clock) = breaker(1, Duration::from_secs(5));
        fail(&cb);
        clock.advance(Duration::from_secs(5));

        let outer = cb.call(|| {
            assert_eq!(cb.state(), CircuitState::HalfOpen);
            let nested = cb.call(|| Ok::<_, Boom>(()));
            assert!(nested.unwrap_err().is_open());
            Ok::<_, Boom>(())
        });
        assert!(outer.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_dropped_trial_releases_slot() {
        let (cb, clock) = breaker(1, Duration::from_secs(5));
        fail(&cb);
        clock.advance(Duration::from_secs(5));

        {
            let pending = cb.execute(|| std::future::pending::<Result<(), Boom>>());
            tokio::pin!(pending);
            let poll = futures::poll!(pending.as_mut());
            assert!(poll.is_pending());
        }

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.execute(|| async { Ok::<_, Boom>(()) }).await.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_success_in_closed_keeps_count_by_default() {
        let (cb, _clock) = breaker(3, Duration::from_secs(30));
        fail(&cb);
        fail(&cb);
        assert!(cb.call(|| Ok::<_, Boom>(())).is_ok());
        assert_eq!(cb.failure_count(), 2);

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_reset_on_success_clears_count() {
        let clock = MockClock::new();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(3)
            .reset_on_success(true)
            .build()
            .unwrap();
        let cb = CircuitBreaker::with_clock("replica", config, clock).unwrap();

        cb.call(|| Err::<(), _>(Boom)).unwrap_err();
        cb.call(|| Err::<(), _>(Boom)).unwrap_err();
        cb.call(|| Ok::<_, Boom>(())).unwrap();
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_reset() {
        let (cb, _clock) = breaker(1, Duration::from_secs(30));
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(cb.metrics().last_failure_time.is_none());
        assert!(cb.call(|| Ok::<_, Boom>(())).is_ok());
    }

    #[test]
    fn test_transitions_are_audited() {
        let sink = Arc::new(MemoryAuditSink::default());
        let (cb, clock) = breaker(1, Duration::from_secs(5));
        let cb = cb.with_sink(sink.clone());

        fail(&cb);
        clock.advance(Duration::from_secs(5));
        cb.call(|| Ok::<_, Boom>(())).unwrap();

        let states: Vec<_> = sink
            .events(AuditEvent::CircuitTransition)
            .into_iter()
            .filter_map(|e| e.circuit_state)
            .collect();
        assert_eq!(states, vec!["OPEN", "HALF_OPEN", "CLOSED"]);
    }

    #[test]
    fn test_circuit_error_into_database_error() {
        let err: DatabaseError =
            CircuitError::<DatabaseError>::Open(CircuitOpenError::new("db", None)).into();
        assert!(err.is_circuit_open());

        let err: DatabaseError =
            CircuitError::Failed(DatabaseError::Query("bad".into())).into();
        assert!(matches!(err, DatabaseError::Query(_)));
    }

    /// Tests circuit breaker handles concurrent async access correctly.
    ///
    /// Verifies:
    /// - Every failure is counted exactly once across tasks
    /// - The circuit ends open once the threshold is crossed
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_counted_once() {
        let config = CircuitBreakerConfig::builder().failure_threshold(100).build().unwrap();
        let cb = Arc::new(CircuitBreaker::new("shared", config).unwrap());
        let mut handles = vec![];

        for _ in 0..50 {
            let cb = Arc::clone(&cb);
            handles.push(tokio::spawn(async move {
                let _ = cb.execute(|| async { Err::<(), _>(Boom) }).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cb.failure_count(), 50);
        assert_eq!(cb.metrics().total_calls, 50);
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}

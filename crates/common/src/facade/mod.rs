//! Single entry point for guarded database calls
//!
//! [`ResilienceFacade::run`] composes the pieces in a fixed order:
//!
//! ```text
//! circuit breaker (one data point per logical call)
//!   └─ retry executor (bounded backoff, retryable failures only)
//!        └─ panic capture (per attempt)
//!             └─ operation
//! ```
//!
//! A terminal failure is classified, logged at a level derived from its
//! severity, recorded to the audit sink and returned as a [`FailedRequest`]
//! ready for the transport layer.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::audit::{AuditEntry, AuditEvent, AuditLevel, NoopAuditSink, SharedAuditSink};
use crate::classify::{classify_with_context, Classification};
use crate::config::{ConfigResult, ResilienceSettings};
use crate::error::{DatabaseError, DatabaseResult, ErrorContext, ErrorSeverity};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, Clock,
    RetryExecutor, RetryPolicy, SystemClock,
};
use crate::response::{ErrorEnvelope, ResponseFormatter};

/// Circuit key used when a call does not name one
pub const DEFAULT_CIRCUIT: &str = "database";

/// Per-call options for [`ResilienceFacade::run`]
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Breaker to charge the call against; defaults to the facade's circuit
    pub circuit_key: Option<String>,
    /// Overrides the facade's retry policy for this call
    pub retry_policy: Option<RetryPolicy>,
    pub cancellation: Option<CancellationToken>,
    pub operation_name: Option<String>,
}

impl RunOptions {
    pub fn new<S: Into<String>>(operation_name: S) -> Self {
        Self { operation_name: Some(operation_name.into()), ..Self::default() }
    }

    pub fn circuit<S: Into<String>>(mut self, key: S) -> Self {
        self.circuit_key = Some(key.into());
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Terminal failure of a guarded call, ready to be sent to the caller
#[derive(Debug, Clone, Error)]
#[error("{} (status {status})", .classification.code)]
pub struct FailedRequest {
    pub status: u16,
    pub envelope: ErrorEnvelope,
    /// Internal classification, never serialized to the caller
    pub classification: Classification,
}

impl FailedRequest {
    pub fn is_retryable(&self) -> bool {
        self.classification.retryable
    }

    pub fn into_envelope(self) -> ErrorEnvelope {
        self.envelope
    }
}

/// Builder for [`ResilienceFacade`]
pub struct ResilienceFacadeBuilder<C: Clock + Clone = SystemClock> {
    settings: ResilienceSettings,
    sink: Option<SharedAuditSink>,
    clock: C,
    default_circuit: String,
}

impl ResilienceFacadeBuilder<SystemClock> {
    pub fn new() -> Self {
        Self {
            settings: ResilienceSettings::default(),
            sink: None,
            clock: SystemClock,
            default_circuit: DEFAULT_CIRCUIT.to_string(),
        }
    }
}

impl Default for ResilienceFacadeBuilder<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock + Clone> ResilienceFacadeBuilder<C> {
    pub fn settings(mut self, settings: ResilienceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn sink(mut self, sink: SharedAuditSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn default_circuit<S: Into<String>>(mut self, key: S) -> Self {
        self.default_circuit = key.into();
        self
    }

    /// Drive breaker recovery timeouts from another clock
    pub fn clock<C2: Clock + Clone>(self, clock: C2) -> ResilienceFacadeBuilder<C2> {
        ResilienceFacadeBuilder {
            settings: self.settings,
            sink: self.sink,
            clock,
            default_circuit: self.default_circuit,
        }
    }

    pub fn build(self) -> ConfigResult<ResilienceFacade<C>> {
        self.settings.validate()?;
        let retry_policy = self.settings.retry_policy()?;
        let breaker_config: CircuitBreakerConfig = self.settings.breaker_config()?;
        let sink: SharedAuditSink = self.sink.unwrap_or_else(|| Arc::new(NoopAuditSink));
        let registry = CircuitBreakerRegistry::with_clock(breaker_config, self.clock)?
            .with_sink(Arc::clone(&sink));

        Ok(ResilienceFacade {
            registry: Arc::new(registry),
            retry_policy,
            formatter: self.settings.formatter(),
            sink,
            default_circuit: self.default_circuit,
        })
    }
}

/// Guards database calls with a circuit breaker and retry policy
pub struct ResilienceFacade<C: Clock + Clone = SystemClock> {
    registry: Arc<CircuitBreakerRegistry<C>>,
    retry_policy: RetryPolicy,
    formatter: ResponseFormatter,
    sink: SharedAuditSink,
    default_circuit: String,
}

impl<C: Clock + Clone> std::fmt::Debug for ResilienceFacade<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceFacade")
            .field("registry", &self.registry)
            .field("retry_policy", &self.retry_policy)
            .field("formatter", &self.formatter)
            .field("default_circuit", &self.default_circuit)
            .finish()
    }
}

impl ResilienceFacade<SystemClock> {
    pub fn builder() -> ResilienceFacadeBuilder<SystemClock> {
        ResilienceFacadeBuilder::new()
    }

    pub fn from_settings(settings: ResilienceSettings) -> ConfigResult<Self> {
        Self::builder().settings(settings).build()
    }
}

impl<C: Clock + Clone> ResilienceFacade<C> {
    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry<C>> {
        &self.registry
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn formatter(&self) -> &ResponseFormatter {
        &self.formatter
    }

    /// State of a breaker, `None` if it has never been used
    pub fn circuit_state(&self, key: &str) -> Option<CircuitState> {
        self.registry.state(key)
    }

    /// Run an async operation under breaker and retry protection
    pub async fn run<F, Fut, T>(&self, mut operation: F, options: RunOptions) -> Result<T, FailedRequest>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DatabaseResult<T>>,
    {
        let key = options.circuit_key.clone().unwrap_or_else(|| self.default_circuit.clone());
        let context = self.context(&options, &key);
        let breaker = self.breaker(&key, &context)?;
        let executor = self.executor(options);

        let attempt = || {
            let started = std::panic::catch_unwind(AssertUnwindSafe(&mut operation));
            async move {
                match started {
                    Ok(pending) => AssertUnwindSafe(pending)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|payload| Err(DatabaseError::from_panic(payload))),
                    Err(payload) => Err(DatabaseError::from_panic(payload)),
                }
            }
        };
        let result = breaker
            .execute_with(|| executor.execute(attempt), DatabaseError::counts_against_circuit)
            .await;

        result.map_err(|err| self.fail(&DatabaseError::from(err), &context, &breaker))
    }

    /// Synchronous variant of [`run`](Self::run); sleeps the calling thread
    /// between attempts
    pub fn run_blocking<F, T>(&self, mut operation: F, options: RunOptions) -> Result<T, FailedRequest>
    where
        F: FnMut() -> DatabaseResult<T>,
    {
        let key = options.circuit_key.clone().unwrap_or_else(|| self.default_circuit.clone());
        let context = self.context(&options, &key);
        let breaker = self.breaker(&key, &context)?;
        let executor = self.executor(options);

        let attempt = || {
            std::panic::catch_unwind(AssertUnwindSafe(&mut operation))
                .unwrap_or_else(|payload| Err(DatabaseError::from_panic(payload)))
        };
        let result =
            breaker.call_with(|| executor.execute_blocking(attempt), DatabaseError::counts_against_circuit);

        result.map_err(|err| self.fail(&DatabaseError::from(err), &context, &breaker))
    }

    /// Classify and format a failure raised outside [`run`](Self::run)
    pub fn failed_request(&self, err: &DatabaseError, context: &ErrorContext) -> FailedRequest {
        let classification = classify_with_context(err, context);
        FailedRequest {
            status: self.formatter.status_code(&classification),
            envelope: self.formatter.format(&classification),
            classification,
        }
    }

    fn context(&self, options: &RunOptions, key: &str) -> ErrorContext {
        ErrorContext { operation: options.operation_name.clone(), circuit: Some(key.to_string()) }
    }

    fn breaker(&self, key: &str, context: &ErrorContext) -> Result<Arc<CircuitBreaker<C>>, FailedRequest> {
        self.registry.get_or_create(key).map_err(|err| {
            let err = DatabaseError::other_with_source("circuit breaker unavailable", err);
            self.failed_request(&err, context)
        })
    }

    fn executor(&self, options: RunOptions) -> RetryExecutor {
        let mut executor =
            RetryExecutor::new(options.retry_policy.unwrap_or_else(|| self.retry_policy.clone()))
                .with_sink(Arc::clone(&self.sink));
        if let Some(token) = options.cancellation {
            executor = executor.with_cancellation(token);
        }
        if let Some(name) = options.operation_name {
            executor = executor.with_label(name);
        }
        executor
    }

    fn fail(
        &self,
        err: &DatabaseError,
        context: &ErrorContext,
        breaker: &CircuitBreaker<C>,
    ) -> FailedRequest {
        let failed = self.failed_request(err, context);
        let cls = &failed.classification;
        let circuit = breaker.name();
        let operation = context.operation.as_deref();
        let circuit_open = err.is_circuit_open();
        let circuit_state = breaker.state();

        match cls.severity {
            ErrorSeverity::Critical | ErrorSeverity::High => error!(
                circuit,
                operation,
                kind = %cls.kind,
                code = cls.code,
                severity = %cls.severity,
                status = failed.status,
                circuit_open,
                %circuit_state,
                raw = cls.raw_message.as_deref(),
                "Database operation failed"
            ),
            ErrorSeverity::Medium => warn!(
                circuit,
                operation,
                kind = %cls.kind,
                code = cls.code,
                severity = %cls.severity,
                status = failed.status,
                circuit_open,
                %circuit_state,
                raw = cls.raw_message.as_deref(),
                "Database operation failed"
            ),
            ErrorSeverity::Low => info!(
                circuit,
                operation,
                kind = %cls.kind,
                code = cls.code,
                status = failed.status,
                circuit_open,
                "Database operation did not complete"
            ),
        }

        let (event, message) = if circuit_open {
            (AuditEvent::CircuitRejected, format!("circuit '{circuit}' rejected call"))
        } else {
            (
                AuditEvent::OperationFailed,
                format!("{} failed: {}", operation.unwrap_or("operation"), cls.code),
            )
        };
        self.sink.record(
            &AuditEntry::new(AuditLevel::from(cls.severity), event, message)
                .with_classification(cls)
                .with_circuit(circuit, circuit_state),
        );

        failed
    }
}

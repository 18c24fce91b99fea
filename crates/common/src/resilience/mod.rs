//! Resilience patterns for database calls
//!
//! - **Retry Executor**: bounded exponential backoff, retrying only failures
//!   whose classification is retryable
//! - **Circuit Breaker**: per-dependency state machine that stops calling a
//!   degraded dependency and probes for recovery
//! - **Registry**: breakers shared by key
//!
//! The breaker is generic over the wrapped error type; the retry executor
//! works on [`DatabaseError`](crate::error::DatabaseError) because it needs a
//! classification to decide retryability.

pub mod circuit_breaker;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitError, CircuitState, Clock, MockClock, SystemClock,
};
pub use registry::CircuitBreakerRegistry;
pub use retry::{RetryExecutor, RetryOutcome, RetryPolicy, RetryPolicyBuilder};

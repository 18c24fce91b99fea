//! Error classification and resilience for database calls.
//!
//! # Safety and Quality
//!
//! This crate forbids unsafe code and keeps every fallible path on explicit
//! `Result` returns.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error taxonomy, classifier, response formatter, audit
//!   sink, settings
//! - `runtime`: async infrastructure (retry executor, circuit breaker,
//!   registry, facade)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod audit;
#[cfg(feature = "foundation")]
pub mod classify;
#[cfg(feature = "foundation")]
pub mod config;
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod response;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod facade;
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use audit::{
    AuditEntry, AuditEvent, AuditSink, MemoryAuditSink, NoopAuditSink, TracingAuditSink,
};
#[cfg(feature = "foundation")]
pub use classify::{classify, classify_with_context, Classification};
#[cfg(feature = "foundation")]
pub use config::{ConfigError, ResilienceSettings};
#[cfg(feature = "foundation")]
pub use error::{
    CircuitOpenError, DatabaseError, DatabaseResult, ErrorClassification, ErrorContext, ErrorKind,
    ErrorSeverity,
};
#[cfg(feature = "runtime")]
pub use facade::{FailedRequest, ResilienceFacade, RunOptions};
#[cfg(feature = "runtime")]
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitError, CircuitState,
    RetryExecutor, RetryPolicy,
};
#[cfg(feature = "foundation")]
pub use response::{format, status_code_for, Environment, ErrorEnvelope, ResponseFormatter};

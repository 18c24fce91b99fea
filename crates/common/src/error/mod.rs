//! Raw database failure types and the classification seam
//!
//! Every failure that reaches the resilience layer is first decided into a
//! [`DatabaseError`] at the driver boundary. The enum is sealed: the
//! classifier matches it exhaustively instead of inspecting the shape of an
//! arbitrary error at runtime.
//!
//! # Error Handling Architecture
//!
//! 1. **`DatabaseError`**: the tagged union of everything the data layer can
//!    raise (typed library failures, vendor-coded driver errors, generic
//!    errors, opaque panic payloads) plus the two failures the resilience
//!    layer produces itself (`CircuitOpen`, `Cancelled`).
//!
//! 2. **`ErrorClassification` trait**: the interface the retry executor and
//!    the facade consume. Anything that can produce a
//!    [`Classification`](crate::classify::Classification) can be retried.
//!
//! 3. **`ErrorKind` / `ErrorSeverity`**: the taxonomy axes shared by logging,
//!    retry decisions and the response formatter.
//!
//! ## Mapping at the boundary
//!
//! ```rust,ignore
//! use dbshield_common::error::DatabaseError;
//!
//! fn from_driver(code: &str, message: &str) -> DatabaseError {
//!     DatabaseError::driver(code, message)
//! }
//! ```

use std::any::Any;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::classify::{self, Classification};

/// Boxed error type used to keep an underlying cause
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Standard result type for operations guarded by the resilience layer
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Raw failure raised by the data layer or by the resilience layer itself
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The data store could not be reached
    #[error("Database connection error: {0}")]
    Connection(String),

    /// The data store did not answer in time
    #[error("Database timeout: {0}")]
    Timeout(String),

    /// A query was rejected or failed to execute
    #[error("Database query error: {0}")]
    Query(String),

    /// A schema migration failed
    #[error("Database migration error: {0}")]
    Migration(String),

    /// Vendor error carrying a SQLSTATE-like code
    #[error("Database error {code}: {message}")]
    Driver { code: String, message: String, detail: Option<String> },

    /// Generic error with a message and an optional cause
    #[error("{message}")]
    Other {
        message: String,
        #[source]
        source: Option<BoxedError>,
    },

    /// Non-error failure value, such as a panic payload
    #[error("Unexpected failure: {description}")]
    Opaque { description: String },

    /// The circuit guarding the dependency rejected the call
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// The retry loop was aborted by the caller
    #[error("Operation cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl DatabaseError {
    /// Create a vendor-coded driver error
    pub fn driver<C: Into<String>, M: Into<String>>(code: C, message: M) -> Self {
        Self::Driver { code: code.into(), message: message.into(), detail: None }
    }

    /// Create a vendor-coded driver error with the vendor's detail text
    pub fn driver_with_detail<C, M, D>(code: C, message: M, detail: D) -> Self
    where
        C: Into<String>,
        M: Into<String>,
        D: Into<String>,
    {
        Self::Driver { code: code.into(), message: message.into(), detail: Some(detail.into()) }
    }

    /// Create a generic error from a message
    pub fn other<M: Into<String>>(message: M) -> Self {
        Self::Other { message: message.into(), source: None }
    }

    /// Create a generic error that keeps its cause for the internal stack
    pub fn other_with_source<M, E>(message: M, source: E) -> Self
    where
        M: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Convert a caught panic payload into an opaque failure
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let description = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-error value raised by operation".to_string()
        };
        Self::Opaque { description }
    }

    /// Vendor code carried by this error, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Driver { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// Whether this failure was produced by an open circuit
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// Whether this failure says something about the dependency's health
    ///
    /// A caller cancelling and a circuit rejecting the call are both decided
    /// before or outside the dependency, so neither should trip a breaker.
    pub fn counts_against_circuit(&self) -> bool {
        !matches!(self, Self::Cancelled { .. } | Self::CircuitOpen(_))
    }

    /// Render the chain of underlying causes, one per line
    ///
    /// Stands in for a stack trace in internal logs and development
    /// responses. Returns `None` when the error has no cause or detail.
    pub fn cause_chain(&self) -> Option<String> {
        let mut lines = Vec::new();
        if let Self::Driver { detail: Some(detail), .. } = self {
            lines.push(format!("detail: {detail}"));
        }
        let mut current = std::error::Error::source(self);
        while let Some(cause) = current {
            lines.push(format!("caused by: {cause}"));
            current = cause.source();
        }
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

/// Raised by a circuit breaker instead of invoking the guarded operation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Circuit '{circuit}' is open")]
pub struct CircuitOpenError {
    /// Key of the guarded dependency
    pub circuit: String,
    /// Time left until the breaker admits a trial call
    pub retry_after: Option<Duration>,
}

impl CircuitOpenError {
    pub fn new<S: Into<String>>(circuit: S, retry_after: Option<Duration>) -> Self {
        Self { circuit: circuit.into(), retry_after }
    }
}

/// Failure categories of the taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Connection,
    Timeout,
    Query,
    Constraint,
    Migration,
    Unknown,
}

impl ErrorKind {
    /// Stable name used in logs and envelopes
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "CONNECTION",
            Self::Timeout => "TIMEOUT",
            Self::Query => "QUERY",
            Self::Constraint => "CONSTRAINT",
            Self::Migration => "MIGRATION",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error severity levels for logging and status selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    /// Expected condition, informational only
    Low,
    /// Degraded but operational
    Medium,
    /// Failure requiring attention
    High,
    /// Dependency integrity or availability at risk
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied context attached to a classification for logging
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit: Option<String>,
}

impl ErrorContext {
    /// Create a context for a named operation
    pub fn new<S: Into<String>>(operation: S) -> Self {
        Self { operation: Some(operation.into()), circuit: None }
    }

    /// Attach the key of the circuit guarding the operation
    pub fn with_circuit<S: Into<String>>(mut self, circuit: S) -> Self {
        self.circuit = Some(circuit.into());
        self
    }
}

/// Error classification trait consumed by the retry executor and facade
///
/// Implementors only provide [`classification`](Self::classification); the
/// remaining methods are derived from it so retryability is always decided
/// by category.
pub trait ErrorClassification {
    /// Map this error onto the taxonomy
    fn classification(&self) -> Classification;

    /// Check if re-attempting the operation may succeed
    fn is_retryable(&self) -> bool {
        self.classification().retryable
    }

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity {
        self.classification().severity
    }

    /// Get the taxonomy kind
    fn kind(&self) -> ErrorKind {
        self.classification().kind
    }
}

impl ErrorClassification for DatabaseError {
    fn classification(&self) -> Classification {
        classify::classify(self)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the raw failure types.
    use super::*;

    #[derive(Debug, Error)]
    #[error("socket reset")]
    struct SocketReset;

    #[derive(Debug, Error)]
    #[error("pool checkout failed")]
    struct PoolCheckout(#[source] SocketReset);

    #[test]
    fn test_display_typed_failures() {
        assert_eq!(
            DatabaseError::Connection("refused".into()).to_string(),
            "Database connection error: refused"
        );
        assert_eq!(DatabaseError::Timeout("5s".into()).to_string(), "Database timeout: 5s");
        assert_eq!(
            DatabaseError::driver("23505", "duplicate key").to_string(),
            "Database error 23505: duplicate key"
        );
        assert_eq!(
            DatabaseError::Cancelled { attempts: 2 }.to_string(),
            "Operation cancelled after 2 attempt(s)"
        );
    }

    #[test]
    fn test_circuit_open_is_transparent() {
        let err: DatabaseError = CircuitOpenError::new("primary-db", None).into();
        assert!(err.is_circuit_open());
        assert_eq!(err.to_string(), "Circuit 'primary-db' is open");
    }

    #[test]
    fn test_from_panic_extracts_message() {
        let err = DatabaseError::from_panic(Box::new("boom"));
        assert_eq!(err.to_string(), "Unexpected failure: boom");

        let err = DatabaseError::from_panic(Box::new(String::from("owned boom")));
        assert!(err.to_string().contains("owned boom"));

        let err = DatabaseError::from_panic(Box::new(42_u8));
        assert!(matches!(err, DatabaseError::Opaque { .. }));
    }

    /// Validates the cause chain rendering used as the internal stack.
    ///
    /// Assertions:
    /// - Every nested source appears on its own line.
    /// - Errors without causes render `None`.
    #[test]
    fn test_cause_chain() {
        let err = DatabaseError::other_with_source("load failed", PoolCheckout(SocketReset));
        let chain = err.cause_chain().unwrap();
        assert_eq!(chain, "caused by: pool checkout failed\ncaused by: socket reset");

        assert!(DatabaseError::other("plain").cause_chain().is_none());

        let err = DatabaseError::driver_with_detail("23505", "dup", "Key (email)=(a@b.c)");
        assert_eq!(err.cause_chain().as_deref(), Some("detail: Key (email)=(a@b.c)"));
    }

    #[test]
    fn test_code_accessor() {
        assert_eq!(DatabaseError::driver("08006", "x").code(), Some("08006"));
        assert_eq!(DatabaseError::Query("x".into()).code(), None);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Low < ErrorSeverity::Medium);
        assert!(ErrorSeverity::Medium < ErrorSeverity::High);
        assert!(ErrorSeverity::High < ErrorSeverity::Critical);
        assert_eq!(ErrorSeverity::Critical.to_string(), "CRITICAL");
    }

    #[test]
    fn test_error_context_builder() {
        let ctx = ErrorContext::new("orders.list").with_circuit("primary-db");
        assert_eq!(ctx.operation.as_deref(), Some("orders.list"));
        assert_eq!(ctx.circuit.as_deref(), Some("primary-db"));
    }
}

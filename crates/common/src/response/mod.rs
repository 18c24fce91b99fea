//! Response formatter
//!
//! Turns a [`Classification`] into the transport-level error envelope and
//! picks the HTTP status. Internals (raw driver message, cause chain, caller
//! context) are only ever attached in [`Environment::Development`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::Classification;
use crate::error::{ErrorContext, ErrorKind, ErrorSeverity};

/// Deployment mode that controls how much detail leaves the process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => f.write_str("development"),
            Self::Production => f.write_str("production"),
        }
    }
}

/// Error returned when an environment name is not recognized
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown environment '{0}' (expected 'development' or 'production')")]
pub struct ParseEnvironmentError(pub String);

impl FromStr for Environment {
    type Err = ParseEnvironmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ParseEnvironmentError(other.to_string())),
        }
    }
}

/// Internal details, present only in development responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContext>,
}

/// `error` object of the envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: &'static str,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub is_retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

/// JSON envelope returned to the caller of a failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub message: &'static str,
    pub error: ErrorBody,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

fn serialize_timestamp<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// HTTP status for a classification
///
/// | kind | status |
/// |------|--------|
/// | Connection, Timeout, Migration | 503 |
/// | Constraint | 400 |
/// | Query with `High` severity | 500 |
/// | Query otherwise | 422 |
/// | Unknown | 500 |
pub fn status_code_for(classification: &Classification) -> u16 {
    match classification.kind {
        ErrorKind::Connection | ErrorKind::Timeout | ErrorKind::Migration => 503,
        ErrorKind::Constraint => 400,
        ErrorKind::Query if classification.severity == ErrorSeverity::High => 500,
        ErrorKind::Query => 422,
        ErrorKind::Unknown => 500,
    }
}

/// Build the envelope for a classification
pub fn format(classification: &Classification, environment: Environment) -> ErrorEnvelope {
    ResponseFormatter::new(environment).format(classification)
}

/// Envelope builder bound to one environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseFormatter {
    environment: Environment,
    verbose: bool,
}

impl ResponseFormatter {
    pub fn new(environment: Environment) -> Self {
        Self { environment, verbose: false }
    }

    /// Request caller context and cause chains in details.
    ///
    /// Has no effect in production.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn status_code(&self, classification: &Classification) -> u16 {
        status_code_for(classification)
    }

    pub fn format(&self, classification: &Classification) -> ErrorEnvelope {
        let details = match self.environment {
            Environment::Production => None,
            Environment::Development => Some(ErrorDetails {
                raw_message: classification.raw_message.clone(),
                stack: classification.raw_stack.clone(),
                context: if self.verbose { classification.context.clone() } else { None },
            }),
        };

        ErrorEnvelope {
            success: false,
            message: classification.user_message,
            error: ErrorBody {
                code: classification.code,
                kind: classification.kind,
                severity: classification.severity,
                is_retryable: classification.retryable,
                details,
            },
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::error::DatabaseError;

    fn unique_violation() -> Classification {
        classify(&DatabaseError::driver("23505", "duplicate key value violates \"users_email_key\""))
    }

    #[test]
    fn test_status_table() {
        let status = |err: DatabaseError| status_code_for(&classify(&err));
        assert_eq!(status(DatabaseError::Connection("x".into())), 503);
        assert_eq!(status(DatabaseError::Timeout("x".into())), 503);
        assert_eq!(status(DatabaseError::Migration("x".into())), 503);
        assert_eq!(status(DatabaseError::driver("23503", "x")), 400);
        assert_eq!(status(DatabaseError::driver("42P01", "x")), 500);
        assert_eq!(status(DatabaseError::Query("x".into())), 422);
        assert_eq!(status(DatabaseError::other("x")), 500);
        assert_eq!(status(DatabaseError::Opaque { description: "x".into() }), 500);
    }

    #[test]
    fn test_production_omits_details() {
        let envelope = format(&unique_violation(), Environment::Production);
        assert!(!envelope.success);
        assert!(envelope.error.details.is_none());

        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json["error"].get("details").is_none());
        assert!(!json.to_string().contains("users_email_key"));
    }

    #[test]
    fn test_production_ignores_verbose() {
        let envelope =
            ResponseFormatter::new(Environment::Production).verbose(true).format(&unique_violation());
        assert!(envelope.error.details.is_none());
    }

    #[test]
    fn test_development_includes_raw_message() {
        let envelope = format(&unique_violation(), Environment::Development);
        let details = envelope.error.details.unwrap();
        assert!(details.raw_message.unwrap().contains("users_email_key"));
        assert!(details.context.is_none());
    }

    #[test]
    fn test_verbose_development_includes_context() {
        let cls = unique_violation().with_context(ErrorContext::new("users.create"));
        let envelope = ResponseFormatter::new(Environment::Development).verbose(true).format(&cls);
        let context = envelope.error.details.and_then(|d| d.context);
        assert_eq!(context.and_then(|c| c.operation).as_deref(), Some("users.create"));
    }

    /// Validates the wire shape of the envelope.
    ///
    /// Assertions:
    /// - Keys use the camelCase names callers depend on.
    /// - `type` and `severity` serialize in upper snake case.
    /// - `timestamp` is RFC 3339 with a `Z` suffix.
    #[test]
    fn test_envelope_wire_shape() {
        let json = serde_json::to_value(format(&unique_violation(), Environment::Production))
            .unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "UNIQUE_VIOLATION");
        assert_eq!(json["error"]["type"], "CONSTRAINT");
        assert_eq!(json["error"]["severity"], "MEDIUM");
        assert_eq!(json["error"]["isRetryable"], false);
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("development".parse::<Environment>(), Ok(Environment::Development));
        assert_eq!(" PROD ".parse::<Environment>(), Ok(Environment::Production));
        assert!("staging".parse::<Environment>().is_err());
        assert_eq!(Environment::default(), Environment::Production);
    }
}

//! Error classifier
//!
//! Maps a [`DatabaseError`] onto the taxonomy. Classification is total and
//! never panics: the match is exhaustive over the sealed error enum and any
//! vendor code missing from [`codes::CODE_TABLE`] lands in `Unknown`.
//!
//! Order of precedence:
//!
//! | Input | Source of the mapping |
//! |-------|-----------------------|
//! | Typed library failure | [`typed_entry`] lookup table |
//! | Vendor-coded driver error | [`codes::lookup`] |
//! | Generic error | `Unknown` / `Medium` |
//! | Opaque value (panic payload) | `Unknown` / `High` |
//!
//! Retryability is a property of the category, never of message text.

pub mod codes;

use serde::Serialize;

use crate::error::{DatabaseError, ErrorContext, ErrorKind, ErrorSeverity};

/// Message shown for anything the taxonomy cannot place more precisely
pub const GENERIC_USER_MESSAGE: &str = "An unexpected error occurred. Please try again.";

/// Structured outcome of mapping a raw failure onto the taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub kind: ErrorKind,
    /// Stable machine-readable identifier
    pub code: &'static str,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    /// Human-safe message, never contains driver output
    pub user_message: &'static str,
    /// Raw driver message, internal logging only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_message: Option<String>,
    /// Rendered cause chain, internal logging only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContext>,
}

impl Classification {
    fn new(
        kind: ErrorKind,
        code: &'static str,
        severity: ErrorSeverity,
        retryable: bool,
        user_message: &'static str,
    ) -> Self {
        Self {
            kind,
            code,
            severity,
            retryable,
            user_message,
            raw_message: None,
            raw_stack: None,
            context: None,
        }
    }

    fn with_raw(mut self, err: &DatabaseError) -> Self {
        self.raw_message = Some(err.to_string());
        self.raw_stack = err.cause_chain();
        self
    }

    /// Attach caller context
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Row of the typed-failure table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedEntry {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    pub user_message: &'static str,
}

const CONNECTION_ENTRY: TypedEntry = TypedEntry {
    kind: ErrorKind::Connection,
    code: "DB_CONNECTION_ERROR",
    severity: ErrorSeverity::Critical,
    retryable: true,
    user_message: "Unable to connect to the database. Please try again later.",
};

const TIMEOUT_ENTRY: TypedEntry = TypedEntry {
    kind: ErrorKind::Timeout,
    code: "DB_TIMEOUT",
    severity: ErrorSeverity::High,
    retryable: true,
    user_message: "The database took too long to respond. Please try again.",
};

const QUERY_ENTRY: TypedEntry = TypedEntry {
    kind: ErrorKind::Query,
    code: "DB_QUERY_ERROR",
    severity: ErrorSeverity::Medium,
    retryable: false,
    user_message: "The requested operation could not be completed.",
};

const MIGRATION_ENTRY: TypedEntry = TypedEntry {
    kind: ErrorKind::Migration,
    code: "DB_MIGRATION_ERROR",
    severity: ErrorSeverity::Critical,
    retryable: false,
    user_message: "The service is being updated. Please try again later.",
};

impl From<TypedEntry> for Classification {
    fn from(entry: TypedEntry) -> Self {
        Self::new(entry.kind, entry.code, entry.severity, entry.retryable, entry.user_message)
    }
}

/// Canonical table for the library's own typed failures
///
/// Returns `None` for variants that are not typed failures.
pub fn typed_entry(err: &DatabaseError) -> Option<TypedEntry> {
    match err {
        DatabaseError::Connection(_) => Some(CONNECTION_ENTRY),
        DatabaseError::Timeout(_) => Some(TIMEOUT_ENTRY),
        DatabaseError::Query(_) => Some(QUERY_ENTRY),
        DatabaseError::Migration(_) => Some(MIGRATION_ENTRY),
        _ => None,
    }
}

/// Classify a raw failure
pub fn classify(err: &DatabaseError) -> Classification {
    if let Some(entry) = typed_entry(err) {
        return Classification::from(entry).with_raw(err);
    }

    let classification = match err {
        DatabaseError::Driver { code, .. } => match codes::lookup(code) {
            Some(entry) => Classification::new(
                entry.class.kind(),
                entry.code,
                entry.class.severity(),
                entry.class.retryable(),
                entry.user_message,
            ),
            None => Classification::new(
                ErrorKind::Unknown,
                "DATABASE_ERROR",
                ErrorSeverity::Medium,
                false,
                GENERIC_USER_MESSAGE,
            ),
        },
        // Typed failures were answered by `typed_entry` above
        DatabaseError::Other { .. }
        | DatabaseError::Connection(_)
        | DatabaseError::Timeout(_)
        | DatabaseError::Query(_)
        | DatabaseError::Migration(_) => Classification::new(
            ErrorKind::Unknown,
            "UNKNOWN_ERROR",
            ErrorSeverity::Medium,
            false,
            GENERIC_USER_MESSAGE,
        ),
        DatabaseError::Opaque { .. } => Classification::new(
            ErrorKind::Unknown,
            "UNEXPECTED_FAILURE",
            ErrorSeverity::High,
            false,
            GENERIC_USER_MESSAGE,
        ),
        DatabaseError::CircuitOpen(_) => Classification::new(
            ErrorKind::Timeout,
            "CIRCUIT_OPEN",
            ErrorSeverity::High,
            true,
            "The service is temporarily unavailable. Please try again later.",
        ),
        DatabaseError::Cancelled { .. } => Classification::new(
            ErrorKind::Timeout,
            "OPERATION_CANCELLED",
            ErrorSeverity::Low,
            false,
            "The request was cancelled before it could complete.",
        ),
    };

    classification.with_raw(err)
}

/// Classify a raw failure and attach caller context
pub fn classify_with_context(err: &DatabaseError, context: &ErrorContext) -> Classification {
    classify(err).with_context(context.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CircuitOpenError;

    #[test]
    fn test_classify_agrees_with_typed_table() {
        let typed = [
            DatabaseError::Connection("refused".into()),
            DatabaseError::Timeout("pool wait".into()),
            DatabaseError::Query("bad".into()),
            DatabaseError::Migration("v12".into()),
        ];
        for err in &typed {
            let entry = typed_entry(err).unwrap();
            assert_eq!(classify(err), Classification::from(entry).with_raw(err));
        }

        assert!(typed_entry(&DatabaseError::driver("23505", "dup")).is_none());
        assert!(typed_entry(&DatabaseError::other("boom")).is_none());
    }

    #[test]
    fn test_typed_failures_use_lookup_table() {
        let cls = classify(&DatabaseError::Connection("refused".into()));
        assert_eq!(cls.kind, ErrorKind::Connection);
        assert_eq!(cls.severity, ErrorSeverity::Critical);
        assert!(cls.retryable);

        let cls = classify(&DatabaseError::Timeout("pool wait".into()));
        assert_eq!((cls.kind, cls.retryable), (ErrorKind::Timeout, true));

        let cls = classify(&DatabaseError::Query("syntax".into()));
        assert_eq!(
            (cls.kind, cls.severity, cls.retryable),
            (ErrorKind::Query, ErrorSeverity::Medium, false)
        );

        let cls = classify(&DatabaseError::Migration("v12".into()));
        assert_eq!((cls.kind, cls.retryable), (ErrorKind::Migration, false));
    }

    #[test]
    fn test_unique_violation() {
        let cls = classify(&DatabaseError::driver("23505", "duplicate key value"));
        assert_eq!(cls.kind, ErrorKind::Constraint);
        assert_eq!(cls.code, "UNIQUE_VIOLATION");
        assert!(!cls.retryable);
    }

    #[test]
    fn test_unrecognized_code_is_unknown() {
        let cls = classify(&DatabaseError::driver("XX000", "internal error"));
        assert_eq!(cls.kind, ErrorKind::Unknown);
        assert_eq!(cls.severity, ErrorSeverity::Medium);
        assert_eq!(cls.code, "DATABASE_ERROR");
        assert!(!cls.retryable);
    }

    #[test]
    fn test_generic_and_opaque() {
        let cls = classify(&DatabaseError::other("something broke"));
        assert_eq!(cls.kind, ErrorKind::Unknown);
        assert_eq!(cls.severity, ErrorSeverity::Medium);
        assert_eq!(cls.user_message, GENERIC_USER_MESSAGE);

        let cls = classify(&DatabaseError::Opaque { description: "panic".into() });
        assert_eq!(cls.kind, ErrorKind::Unknown);
        assert_eq!(cls.severity, ErrorSeverity::High);
        assert!(!cls.retryable);
    }

    #[test]
    fn test_circuit_open_and_cancelled() {
        let cls = classify(&CircuitOpenError::new("primary-db", None).into());
        assert_eq!(cls.kind, ErrorKind::Timeout);
        assert_eq!(cls.code, "CIRCUIT_OPEN");

        let cls = classify(&DatabaseError::Cancelled { attempts: 1 });
        assert_eq!(cls.code, "OPERATION_CANCELLED");
        assert!(!cls.retryable);
    }

    #[test]
    fn test_raw_message_preserved_but_not_in_user_message() {
        let err = DatabaseError::driver("42P01", "relation \"orders\" does not exist");
        let cls = classify(&err);
        assert_eq!(cls.raw_message.as_deref(), Some(err.to_string().as_str()));
        assert!(!cls.user_message.contains("orders"));
    }

    #[test]
    fn test_classify_with_context() {
        let ctx = ErrorContext::new("orders.create").with_circuit("primary-db");
        let cls = classify_with_context(&DatabaseError::Timeout("slow".into()), &ctx);
        assert_eq!(cls.context, Some(ctx));
    }
}

//! Conversions from driver errors into [`DatabaseError`].
//!
//! This is the boundary where a raw driver failure is decided into one
//! variant of the sealed enum. Vendor codes are normalized to the SQLSTATE
//! values the classifier's code table understands.

use dbshield_common::DatabaseError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the common error.
#[derive(Debug)]
pub struct InfraError(pub DatabaseError);

impl From<InfraError> for DatabaseError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<DatabaseError> for InfraError {
    fn from(value: DatabaseError) -> Self {
        InfraError(value)
    }
}

/// Decide a driver error into a [`DatabaseError`]
pub trait IntoDatabaseError {
    fn into_database_error(self) -> DatabaseError;
}

/// Map well-known "missing object" messages onto SQLSTATE codes
fn schema_code(message: &str) -> Option<&'static str> {
    let lower = message.to_ascii_lowercase();
    if lower.contains("no such table") {
        Some("42P01")
    } else if lower.contains("no such column") {
        Some("42703")
    } else if lower.contains("no such function") {
        Some("42883")
    } else {
        None
    }
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → DatabaseError */
/* -------------------------------------------------------------------------- */

#[cfg(feature = "sqlite")]
mod sqlite {
    use rusqlite::ffi::ErrorCode;
    use rusqlite::Error as SqlError;

    use super::{schema_code, DatabaseError, InfraError, IntoDatabaseError};

    const CONSTRAINT_CHECK: i32 = 275;
    const CONSTRAINT_FOREIGNKEY: i32 = 787;
    const CONSTRAINT_NOTNULL: i32 = 1299;
    const CONSTRAINT_PRIMARYKEY: i32 = 1555;
    const CONSTRAINT_UNIQUE: i32 = 2067;

    fn decide(error: &SqlError, text: &str) -> Option<DatabaseError> {
        if let Some(code) = schema_code(text) {
            return Some(DatabaseError::driver(code, text));
        }

        match error {
            SqlError::SqliteFailure(err, message) => {
                let message = message.clone().unwrap_or_else(|| text.to_string());
                let detail = format!("sqlite extended code {}", err.extended_code);
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked, _) => {
                        Some(DatabaseError::Timeout(message))
                    }
                    (ErrorCode::CannotOpen | ErrorCode::NotADatabase, _) => {
                        Some(DatabaseError::Connection(message))
                    }
                    (ErrorCode::ConstraintViolation, CONSTRAINT_UNIQUE | CONSTRAINT_PRIMARYKEY) => {
                        Some(DatabaseError::driver_with_detail("23505", message, detail))
                    }
                    (ErrorCode::ConstraintViolation, CONSTRAINT_NOTNULL) => {
                        Some(DatabaseError::driver_with_detail("23502", message, detail))
                    }
                    (ErrorCode::ConstraintViolation, CONSTRAINT_FOREIGNKEY) => {
                        Some(DatabaseError::driver_with_detail("23503", message, detail))
                    }
                    (ErrorCode::ConstraintViolation, CONSTRAINT_CHECK) => {
                        Some(DatabaseError::driver_with_detail("23514", message, detail))
                    }
                    (ErrorCode::DiskFull, _) => {
                        Some(DatabaseError::driver_with_detail("53100", message, detail))
                    }
                    (ErrorCode::OutOfMemory, _) => {
                        Some(DatabaseError::driver_with_detail("53200", message, detail))
                    }
                    _ => None,
                }
            }
            SqlError::QueryReturnedNoRows => {
                Some(DatabaseError::Query("query returned no rows".into()))
            }
            SqlError::InvalidQuery => Some(DatabaseError::Query("invalid SQL query".into())),
            SqlError::InvalidParameterName(name) => {
                Some(DatabaseError::Query(format!("invalid parameter name: {name}")))
            }
            SqlError::InvalidColumnType(_, name, ty) => {
                Some(DatabaseError::Query(format!("invalid column type for '{name}': {ty}")))
            }
            SqlError::InvalidPath(path) => Some(DatabaseError::Connection(format!(
                "invalid database path: {}",
                path.to_string_lossy()
            ))),
            _ => None,
        }
    }

    impl IntoDatabaseError for SqlError {
        fn into_database_error(self) -> DatabaseError {
            let text = self.to_string();
            match decide(&self, &text) {
                Some(decided) => decided,
                None => DatabaseError::other_with_source(format!("sqlite failure: {text}"), self),
            }
        }
    }

    impl From<SqlError> for InfraError {
        fn from(value: SqlError) -> Self {
            InfraError(value.into_database_error())
        }
    }
}

/* -------------------------------------------------------------------------- */
/* tokio_postgres::Error → DatabaseError */
/* -------------------------------------------------------------------------- */

/// Parts of a PostgreSQL client error needed to decide its variant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PgFailure {
    pub sqlstate: Option<String>,
    pub message: String,
    pub detail: Option<String>,
    pub closed: bool,
    pub io_kind: Option<std::io::ErrorKind>,
}

impl PgFailure {
    pub fn decide(self) -> Option<DatabaseError> {
        if let Some(code) = self.sqlstate {
            return Some(match self.detail {
                Some(detail) => DatabaseError::driver_with_detail(code, self.message, detail),
                None => DatabaseError::driver(code, self.message),
            });
        }
        match self.io_kind {
            Some(std::io::ErrorKind::TimedOut) => Some(DatabaseError::Timeout(self.message)),
            Some(_) => Some(DatabaseError::Connection(self.message)),
            None if self.closed => Some(DatabaseError::Connection(self.message)),
            None => None,
        }
    }
}

#[cfg(feature = "postgres")]
mod postgres {
    use tokio_postgres::Error as PgError;

    use super::{DatabaseError, InfraError, IntoDatabaseError, PgFailure};

    impl From<&PgError> for PgFailure {
        fn from(err: &PgError) -> Self {
            let io_kind = std::error::Error::source(err)
                .and_then(|source| source.downcast_ref::<std::io::Error>())
                .map(std::io::Error::kind);

            match err.as_db_error() {
                Some(db) => PgFailure {
                    sqlstate: Some(db.code().code().to_string()),
                    message: db.message().to_string(),
                    detail: db.detail().map(str::to_string),
                    closed: err.is_closed(),
                    io_kind,
                },
                None => PgFailure {
                    sqlstate: err.code().map(|state| state.code().to_string()),
                    message: err.to_string(),
                    detail: None,
                    closed: err.is_closed(),
                    io_kind,
                },
            }
        }
    }

    impl IntoDatabaseError for PgError {
        fn into_database_error(self) -> DatabaseError {
            match PgFailure::from(&self).decide() {
                Some(decided) => decided,
                None => DatabaseError::other_with_source("postgres client error", self),
            }
        }
    }

    impl From<PgError> for InfraError {
        fn from(value: PgError) -> Self {
            InfraError(value.into_database_error())
        }
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */

//! SQLSTATE code table
//!
//! Vendor codes are grouped by class; each class shares kind, severity and
//! retryability. Codes absent from the table classify as `Unknown`.

use crate::error::{ErrorKind, ErrorSeverity};

/// Group a vendor code belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeClass {
    /// Connection could not be established or was terminated
    Connection,
    /// Server-side resource exhaustion or statement timeout
    ResourceExhaustion,
    /// Integrity constraint violation
    Integrity,
    /// Reference to a schema object that does not exist
    Schema,
}

impl CodeClass {
    pub fn kind(self) -> ErrorKind {
        match self {
            Self::Connection => ErrorKind::Connection,
            Self::ResourceExhaustion => ErrorKind::Timeout,
            Self::Integrity => ErrorKind::Constraint,
            Self::Schema => ErrorKind::Query,
        }
    }

    pub fn severity(self) -> ErrorSeverity {
        match self {
            Self::Connection => ErrorSeverity::Critical,
            Self::ResourceExhaustion | Self::Schema => ErrorSeverity::High,
            Self::Integrity => ErrorSeverity::Medium,
        }
    }

    pub fn retryable(self) -> bool {
        matches!(self, Self::Connection | Self::ResourceExhaustion)
    }
}

/// One row of the code table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeEntry {
    /// Vendor code as reported by the driver
    pub sqlstate: &'static str,
    /// Stable taxonomy code
    pub code: &'static str,
    pub class: CodeClass,
    pub user_message: &'static str,
}

const CONNECTION_MESSAGE: &str = "Unable to connect to the database. Please try again later.";
const BUSY_MESSAGE: &str = "The database is temporarily overloaded. Please try again shortly.";
const SCHEMA_MESSAGE: &str = "The request could not be processed due to a server error.";

/// Every vendor code the classifier recognizes
pub static CODE_TABLE: &[CodeEntry] = &[
    // Class 08 - connection exception, class 57 - operator intervention
    CodeEntry {
        sqlstate: "08000",
        code: "CONNECTION_EXCEPTION",
        class: CodeClass::Connection,
        user_message: CONNECTION_MESSAGE,
    },
    CodeEntry {
        sqlstate: "08001",
        code: "CONNECTION_REJECTED",
        class: CodeClass::Connection,
        user_message: CONNECTION_MESSAGE,
    },
    CodeEntry {
        sqlstate: "08003",
        code: "CONNECTION_DOES_NOT_EXIST",
        class: CodeClass::Connection,
        user_message: CONNECTION_MESSAGE,
    },
    CodeEntry {
        sqlstate: "08004",
        code: "CONNECTION_REFUSED",
        class: CodeClass::Connection,
        user_message: CONNECTION_MESSAGE,
    },
    CodeEntry {
        sqlstate: "08006",
        code: "CONNECTION_FAILURE",
        class: CodeClass::Connection,
        user_message: CONNECTION_MESSAGE,
    },
    CodeEntry {
        sqlstate: "57P01",
        code: "ADMIN_SHUTDOWN",
        class: CodeClass::Connection,
        user_message: CONNECTION_MESSAGE,
    },
    CodeEntry {
        sqlstate: "57P03",
        code: "CANNOT_CONNECT_NOW",
        class: CodeClass::Connection,
        user_message: CONNECTION_MESSAGE,
    },
    // Resource exhaustion
    CodeEntry {
        sqlstate: "57014",
        code: "STATEMENT_TIMEOUT",
        class: CodeClass::ResourceExhaustion,
        user_message: "The database took too long to respond. Please try again.",
    },
    CodeEntry {
        sqlstate: "53100",
        code: "DISK_FULL",
        class: CodeClass::ResourceExhaustion,
        user_message: BUSY_MESSAGE,
    },
    CodeEntry {
        sqlstate: "53200",
        code: "OUT_OF_MEMORY",
        class: CodeClass::ResourceExhaustion,
        user_message: BUSY_MESSAGE,
    },
    CodeEntry {
        sqlstate: "53300",
        code: "TOO_MANY_CONNECTIONS",
        class: CodeClass::ResourceExhaustion,
        user_message: BUSY_MESSAGE,
    },
    // Class 23 - integrity constraint violation
    CodeEntry {
        sqlstate: "23505",
        code: "UNIQUE_VIOLATION",
        class: CodeClass::Integrity,
        user_message: "A record with the same unique value already exists.",
    },
    CodeEntry {
        sqlstate: "23502",
        code: "NOT_NULL_VIOLATION",
        class: CodeClass::Integrity,
        user_message: "A required value is missing.",
    },
    CodeEntry {
        sqlstate: "23503",
        code: "FOREIGN_KEY_VIOLATION",
        class: CodeClass::Integrity,
        user_message: "The record references data that does not exist or is still in use.",
    },
    CodeEntry {
        sqlstate: "23514",
        code: "CHECK_VIOLATION",
        class: CodeClass::Integrity,
        user_message: "The submitted data does not satisfy a validation rule.",
    },
    CodeEntry {
        sqlstate: "23P01",
        code: "EXCLUSION_VIOLATION",
        class: CodeClass::Integrity,
        user_message: "The submitted data conflicts with an existing record.",
    },
    // Class 42 - undefined objects
    CodeEntry {
        sqlstate: "42P01",
        code: "UNDEFINED_TABLE",
        class: CodeClass::Schema,
        user_message: SCHEMA_MESSAGE,
    },
    CodeEntry {
        sqlstate: "42703",
        code: "UNDEFINED_COLUMN",
        class: CodeClass::Schema,
        user_message: SCHEMA_MESSAGE,
    },
    CodeEntry {
        sqlstate: "42883",
        code: "UNDEFINED_FUNCTION",
        class: CodeClass::Schema,
        user_message: SCHEMA_MESSAGE,
    },
];

/// Look up a vendor code, ignoring case and surrounding whitespace
pub fn lookup(sqlstate: &str) -> Option<&'static CodeEntry> {
    let sqlstate = sqlstate.trim();
    CODE_TABLE.iter().find(|entry| entry.sqlstate.eq_ignore_ascii_case(sqlstate))
}

/// All entries of one class
pub fn entries_in(class: CodeClass) -> impl Iterator<Item = &'static CodeEntry> {
    CODE_TABLE.iter().filter(move |entry| entry.class == class)
}

//! Driver error conversions

pub mod conversions;

pub use conversions::{InfraError, IntoDatabaseError, PgFailure};

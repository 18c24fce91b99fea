//! # dbshield infrastructure
//!
//! Impure edges of the resilience layer:
//! - Settings loader (environment variables and config files)
//! - Tracing subscriber setup
//! - PostgreSQL and SQLite driver error conversions
//! - Axum response adapter for failed requests
//!
//! ## Architecture
//! - Depends on `dbshield-common` for the error taxonomy and facade
//! - Drivers and the HTTP adapter sit behind cargo features

pub mod config;
pub mod errors;
#[cfg(feature = "http")]
pub mod http;
pub mod observability;

// Re-export commonly used items
pub use config::{load, ConfigLoadError};
pub use errors::{InfraError, IntoDatabaseError};
#[cfg(feature = "http")]
pub use http::HttpFailure;
pub use observability::{init_tracing, LogFormat};

//! Configuration loading
//!
//! Loads [`ResilienceSettings`](dbshield_common::ResilienceSettings) from
//! environment variables and files.

pub mod loader;

// Re-export commonly used items
pub use loader::{
    env_present, load, load_from_env, load_from_file, probe_config_paths, ConfigLoadError,
    LoadResult,
};

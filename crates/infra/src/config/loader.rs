//! Configuration loader
//!
//! Loads [`ResilienceSettings`] from environment variables or files.
//!
//! ## Loading Strategy
//! 1. If any `DBSHIELD_*` variable is set, load from the environment; unset
//!    variables keep their defaults
//! 2. Otherwise probe for a config file (JSON or TOML, by extension)
//! 3. Otherwise use the defaults
//!
//! Malformed values are errors in every source. The result is validated
//! before it is returned.
//!
//! ## Environment Variables
//! - `DBSHIELD_MAX_RETRIES`: Retries after the first attempt
//! - `DBSHIELD_BASE_DELAY_MS`: First backoff delay in milliseconds
//! - `DBSHIELD_MAX_DELAY_MS`: Backoff cap in milliseconds
//! - `DBSHIELD_BACKOFF_FACTOR`: Exponential growth factor (>= 1)
//! - `DBSHIELD_FAILURE_THRESHOLD`: Failed calls before the circuit opens
//! - `DBSHIELD_RECOVERY_TIMEOUT_MS`: Open time before a trial call
//! - `DBSHIELD_RESET_ON_SUCCESS`: Clear the failure count on success
//! - `DBSHIELD_ENVIRONMENT`: `development` or `production`
//! - `DBSHIELD_VERBOSE_ERRORS`: Include caller context in development
//!   responses
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./dbshield.json` or `./dbshield.toml` (current working directory)
//! 2. `../dbshield.json` or `../dbshield.toml` (parent directory)
//! 3. Relative to executable location

use std::path::{Path, PathBuf};
use std::str::FromStr;

use dbshield_common::config::{ConfigError, ResilienceSettings};
use thiserror::Error;

/// Prefix shared by every recognized environment variable
pub const ENV_PREFIX: &str = "DBSHIELD_";

const ENV_KEYS: &[&str] = &[
    "DBSHIELD_MAX_RETRIES",
    "DBSHIELD_BASE_DELAY_MS",
    "DBSHIELD_MAX_DELAY_MS",
    "DBSHIELD_BACKOFF_FACTOR",
    "DBSHIELD_FAILURE_THRESHOLD",
    "DBSHIELD_RECOVERY_TIMEOUT_MS",
    "DBSHIELD_RESET_ON_SUCCESS",
    "DBSHIELD_ENVIRONMENT",
    "DBSHIELD_VERBOSE_ERRORS",
];

const FILE_STEM: &str = "dbshield";

/// Errors raised while loading settings
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidEnv { key: String, value: String, reason: String },

    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid {format} in {}: {message}", .path.display())]
    Parse { path: PathBuf, format: &'static str, message: String },

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

pub type LoadResult<T> = Result<T, ConfigLoadError>;

/// Load settings with automatic fallback strategy
///
/// # Errors
/// Returns [`ConfigLoadError`] if the selected source contains malformed or
/// invalid values.
pub fn load() -> LoadResult<ResilienceSettings> {
    if env_present() {
        let settings = load_from_env()?;
        tracing::info!("Resilience settings loaded from environment variables");
        return Ok(settings);
    }

    match probe_config_paths() {
        Some(path) => load_from_file(Some(path)),
        None => {
            tracing::info!("No resilience settings found, using defaults");
            Ok(ResilienceSettings::default())
        }
    }
}

/// Whether any recognized `DBSHIELD_*` variable is set
pub fn env_present() -> bool {
    ENV_KEYS.iter().any(|key| std::env::var_os(key).is_some())
}

/// Load settings from environment variables
///
/// Unset variables keep their default values.
///
/// # Errors
/// Returns [`ConfigLoadError::InvalidEnv`] for a value that does not parse
/// and [`ConfigLoadError::Invalid`] if the combined settings fail validation.
pub fn load_from_env() -> LoadResult<ResilienceSettings> {
    let mut settings = ResilienceSettings::default();

    if let Some(value) = env_parse("DBSHIELD_MAX_RETRIES")? {
        settings.max_retries = value;
    }
    if let Some(value) = env_parse("DBSHIELD_BASE_DELAY_MS")? {
        settings.base_delay_ms = value;
    }
    if let Some(value) = env_parse("DBSHIELD_MAX_DELAY_MS")? {
        settings.max_delay_ms = value;
    }
    if let Some(value) = env_parse("DBSHIELD_BACKOFF_FACTOR")? {
        settings.backoff_factor = value;
    }
    if let Some(value) = env_parse("DBSHIELD_FAILURE_THRESHOLD")? {
        settings.failure_threshold = value;
    }
    if let Some(value) = env_parse("DBSHIELD_RECOVERY_TIMEOUT_MS")? {
        settings.recovery_timeout_ms = value;
    }
    if let Some(value) = env_bool("DBSHIELD_RESET_ON_SUCCESS")? {
        settings.reset_on_success = value;
    }
    if let Some(value) = env_parse("DBSHIELD_ENVIRONMENT")? {
        settings.environment = value;
    }
    if let Some(value) = env_bool("DBSHIELD_VERBOSE_ERRORS")? {
        settings.verbose_errors = value;
    }

    settings.validate()?;
    Ok(settings)
}

/// Load settings from a file
///
/// If `path` is `None`, probes the standard locations and falls back to the
/// defaults when nothing is found.
///
/// # Errors
/// Returns [`ConfigLoadError`] if an explicit path does not exist, the file
/// cannot be read, its format is unsupported or invalid, or the settings fail
/// validation.
pub fn load_from_file(path: Option<PathBuf>) -> LoadResult<ResilienceSettings> {
    let config_path = match path {
        Some(p) if !p.exists() => return Err(ConfigLoadError::NotFound(p)),
        Some(p) => p,
        None => match probe_config_paths() {
            Some(p) => p,
            None => return Ok(ResilienceSettings::default()),
        },
    };

    tracing::info!(path = %config_path.display(), "Loading resilience settings from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|source| ConfigLoadError::Io { path: config_path.clone(), source })?;

    let settings = parse_settings(&contents, &config_path)?;
    settings.validate()?;
    Ok(settings)
}

/// Parse settings from string content, format chosen by file extension
fn parse_settings(contents: &str, path: &Path) -> LoadResult<ResilienceSettings> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents).map_err(|e| ConfigLoadError::Parse {
            path: path.to_path_buf(),
            format: "TOML",
            message: e.to_string(),
        }),
        "json" => serde_json::from_str(contents).map_err(|e| ConfigLoadError::Parse {
            path: path.to_path_buf(),
            format: "JSON",
            message: e.to_string(),
        }),
        other => Err(ConfigLoadError::UnsupportedFormat(other.to_string())),
    }
}

/// Probe standard locations for a settings file
///
/// # Returns
/// The first file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.clone());
        dirs.push(cwd.join(".."));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs.push(exe_dir.to_path_buf());
            dirs.push(exe_dir.join(".."));
        }
    }

    dirs.iter()
        .flat_map(|dir| {
            [dir.join(format!("{FILE_STEM}.json")), dir.join(format!("{FILE_STEM}.toml"))]
        })
        .find(|path| path.exists())
}

/// Parse an optional environment variable
fn env_parse<T>(key: &str) -> LoadResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| ConfigLoadError::InvalidEnv {
            key: key.to_string(),
            value: raw,
            reason: e.to_string(),
        }),
        Err(_) => Ok(None),
    }
}

/// Parse an optional boolean environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str) -> LoadResult<Option<bool>> {
    let Ok(raw) = std::env::var(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigLoadError::InvalidEnv {
            key: key.to_string(),
            value: raw,
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use dbshield_common::response::Environment;
    use once_cell::sync::Lazy;
    use tempfile::NamedTempFile;

    use super::*;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    fn clear_env() {
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    fn temp_config(contents: &str, extension: &str) -> (NamedTempFile, PathBuf) {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        let path = temp_file.path().with_extension(extension);
        std::fs::copy(temp_file.path(), &path).unwrap();
        (temp_file, path)
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");

        for (raw, expected) in [("1", true), ("TRUE", true), ("on", true), ("no", false), ("0", false)]
        {
            std::env::set_var("DBSHIELD_TEST_BOOL", raw);
            assert_eq!(env_bool("DBSHIELD_TEST_BOOL").unwrap(), Some(expected), "{raw}");
        }

        std::env::set_var("DBSHIELD_TEST_BOOL", "maybe");
        assert!(env_bool("DBSHIELD_TEST_BOOL").is_err());

        std::env::remove_var("DBSHIELD_TEST_BOOL");
        assert_eq!(env_bool("DBSHIELD_TEST_BOOL").unwrap(), None);
    }

    #[test]
    fn test_load_from_env_partial() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var("DBSHIELD_MAX_RETRIES", "5");
        std::env::set_var("DBSHIELD_BACKOFF_FACTOR", "1.5");
        std::env::set_var("DBSHIELD_ENVIRONMENT", "development");
        std::env::set_var("DBSHIELD_RESET_ON_SUCCESS", "yes");

        assert!(env_present());
        let settings = load_from_env().unwrap();
        assert_eq!(settings.max_retries, 5);
        assert!((settings.backoff_factor - 1.5).abs() < f64::EPSILON);
        assert_eq!(settings.environment, Environment::Development);
        assert!(settings.reset_on_success);
        assert_eq!(settings.base_delay_ms, 1_000);

        clear_env();
    }

    #[test]
    fn test_load_from_env_invalid_number() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var("DBSHIELD_FAILURE_THRESHOLD", "five");
        let err = load_from_env().unwrap_err();
        assert!(matches!(err, ConfigLoadError::InvalidEnv { ref key, .. } if key == "DBSHIELD_FAILURE_THRESHOLD"));

        clear_env();
    }

    #[test]
    fn test_load_from_env_rejects_invalid_combination() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var("DBSHIELD_BASE_DELAY_MS", "5000");
        std::env::set_var("DBSHIELD_MAX_DELAY_MS", "100");
        assert!(matches!(load_from_env(), Err(ConfigLoadError::Invalid(_))));

        clear_env();
    }

    #[test]
    fn test_load_from_file_json() {
        let (_temp, path) = temp_config(
            r#"{ "maxRetries": 1, "baseDelayMs": 200, "recoveryTimeoutMs": 15000 }"#,
            "json",
        );

        let settings = load_from_file(Some(path.clone())).unwrap();
        assert_eq!(settings.max_retries, 1);
        assert_eq!(settings.base_delay_ms, 200);
        assert_eq!(settings.recovery_timeout_ms, 15_000);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_from_file_toml() {
        let (_temp, path) = temp_config(
            "maxRetries = 4\nbackoffFactor = 3.0\nenvironment = \"production\"\n",
            "toml",
        );

        let settings = load_from_file(Some(path.clone())).unwrap();
        assert_eq!(settings.max_retries, 4);
        assert!((settings.backoff_factor - 3.0).abs() < f64::EPSILON);
        assert_eq!(settings.environment, Environment::Production);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_from_file_errors() {
        let missing = PathBuf::from("/nonexistent/dbshield.toml");
        assert!(matches!(load_from_file(Some(missing)), Err(ConfigLoadError::NotFound(_))));

        let (_temp, path) = temp_config("maxRetries = [", "toml");
        assert!(matches!(
            load_from_file(Some(path.clone())),
            Err(ConfigLoadError::Parse { format: "TOML", .. })
        ));
        std::fs::remove_file(path).ok();

        let (_temp, path) = temp_config("{}", "yaml");
        assert!(matches!(
            load_from_file(Some(path.clone())),
            Err(ConfigLoadError::UnsupportedFormat(_))
        ));
        std::fs::remove_file(path).ok();

        let (_temp, path) = temp_config(r#"{ "failureThreshold": 0 }"#, "json");
        assert!(matches!(load_from_file(Some(path.clone())), Err(ConfigLoadError::Invalid(_))));
        std::fs::remove_file(path).ok();
    }
}

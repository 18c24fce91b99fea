//! Resilience settings
//!
//! [`ResilienceSettings`] is the flat, serializable configuration surface.
//! It converts into the typed [`RetryPolicy`](crate::resilience::RetryPolicy)
//! and [`CircuitBreakerConfig`](crate::resilience::CircuitBreakerConfig) used
//! at runtime. Loading from the environment or a file lives in the infra
//! crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::response::Environment;

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub fn invalid<M: Into<String>>(message: M) -> Self {
        Self::Invalid { message: message.into() }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Flat configuration surface for retry, breaker and response formatting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResilienceSettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub failure_threshold: u64,
    pub recovery_timeout_ms: u64,
    pub reset_on_success: bool,
    pub environment: Environment,
    /// Include caller context in development responses
    pub verbose_errors: bool,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            reset_on_success: false,
            environment: Environment::Production,
            verbose_errors: false,
        }
    }
}

impl ResilienceSettings {
    /// Check every field without building the runtime types
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::invalid(format!(
                "backoffFactor must be a finite number >= 1 (got {})",
                self.backoff_factor
            )));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::invalid(format!(
                "baseDelayMs ({}) must not exceed maxDelayMs ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failureThreshold must be greater than 0"));
        }
        if self.recovery_timeout_ms == 0 {
            return Err(ConfigError::invalid("recoveryTimeoutMs must be greater than 0"));
        }
        Ok(())
    }

    #[cfg(feature = "runtime")]
    pub fn retry_policy(&self) -> ConfigResult<crate::resilience::RetryPolicy> {
        use std::time::Duration;

        crate::resilience::RetryPolicy::builder()
            .max_retries(self.max_retries)
            .base_delay(Duration::from_millis(self.base_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .backoff_factor(self.backoff_factor)
            .build()
    }

    #[cfg(feature = "runtime")]
    pub fn breaker_config(&self) -> ConfigResult<crate::resilience::CircuitBreakerConfig> {
        use std::time::Duration;

        crate::resilience::CircuitBreakerConfig::builder()
            .failure_threshold(self.failure_threshold)
            .recovery_timeout(Duration::from_millis(self.recovery_timeout_ms))
            .reset_on_success(self.reset_on_success)
            .build()
    }

    pub fn formatter(&self) -> crate::response::ResponseFormatter {
        crate::response::ResponseFormatter::new(self.environment).verbose(self.verbose_errors)
    }
}

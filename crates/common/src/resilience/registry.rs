//! Named circuit breakers, one per guarded dependency

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, Clock, SystemClock,
};
use crate::audit::SharedAuditSink;
use crate::config::ConfigResult;

/// Lazily creates and shares breakers by key
///
/// Every breaker created by the registry uses the same configuration,
/// clock and audit sink. Callers hold breakers through `Arc` so a handle stays
/// valid after [`remove`](Self::remove).
pub struct CircuitBreakerRegistry<C: Clock + Clone = SystemClock> {
    breakers: DashMap<String, Arc<CircuitBreaker<C>>>,
    config: CircuitBreakerConfig,
    clock: C,
    sink: Option<SharedAuditSink>,
}

impl<C: Clock + Clone> std::fmt::Debug for CircuitBreakerRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("config", &self.config)
            .field("breakers", &self.breakers.len())
            .finish()
    }
}

impl CircuitBreakerRegistry<SystemClock> {
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock + Clone> CircuitBreakerRegistry<C> {
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { breakers: DashMap::new(), config, clock, sink: None })
    }

    pub fn with_sink(mut self, sink: SharedAuditSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Breaker for `key`, created on first use
    pub fn get_or_create(&self, key: &str) -> ConfigResult<Arc<CircuitBreaker<C>>> {
        if let Some(existing) = self.breakers.get(key) {
            return Ok(Arc::clone(existing.value()));
        }

        let entry = self.breakers.entry(key.to_string());
        let breaker = match entry {
            Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            Entry::Vacant(vacant) => {
                let mut breaker =
                    CircuitBreaker::with_clock(key, self.config.clone(), self.clock.clone())?;
                if let Some(sink) = &self.sink {
                    breaker = breaker.with_sink(Arc::clone(sink));
                }
                debug!(circuit = key, "Registered circuit breaker");
                Arc::clone(vacant.insert(Arc::new(breaker)).value())
            }
        };
        Ok(breaker)
    }

    pub fn get(&self, key: &str) -> Option<Arc<CircuitBreaker<C>>> {
        self.breakers.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, key: &str) -> Option<Arc<CircuitBreaker<C>>> {
        self.breakers.remove(key).map(|(_, breaker)| breaker)
    }

    pub fn state(&self, key: &str) -> Option<CircuitState> {
        self.get(key).map(|breaker| breaker.state())
    }

    /// Snapshot of every registered breaker, sorted by key
    pub fn snapshot(&self) -> Vec<(String, CircuitBreakerMetrics)> {
        let mut all: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().metrics()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn reset_all(&self) {
        for entry in &self.breakers {
            entry.value().reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

//! Audit sink for retry attempts, circuit transitions and terminal failures
//!
//! The sink is an injected collaborator with a single method. The facade
//! defaults to [`NoopAuditSink`] since every component already logs its own
//! decisions. [`TracingAuditSink`] re-emits entries under the
//! `dbshield::audit` target for deployments that route audit lines
//! separately; [`MemoryAuditSink`] keeps a bounded in-memory buffer for
//! inspection.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::classify::Classification;
use crate::error::{ErrorKind, ErrorSeverity};

/// Level of an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}

impl From<ErrorSeverity> for AuditLevel {
    fn from(severity: ErrorSeverity) -> Self {
        match severity {
            ErrorSeverity::Low => Self::Info,
            ErrorSeverity::Medium => Self::Warn,
            ErrorSeverity::High | ErrorSeverity::Critical => Self::Error,
        }
    }
}

/// Event that produced an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    RetryScheduled,
    CircuitTransition,
    CircuitRejected,
    OperationFailed,
}

/// One structured audit record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub event: AuditEvent,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_state: Option<String>,
}

impl AuditEntry {
    pub fn new<M: Into<String>>(level: AuditLevel, event: AuditEvent, message: M) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            event,
            message: message.into(),
            kind: None,
            code: None,
            attempt: None,
            delay_ms: None,
            circuit: None,
            circuit_state: None,
        }
    }

    /// Copy kind and code from a classification
    pub fn with_classification(mut self, classification: &Classification) -> Self {
        self.kind = Some(classification.kind);
        self.code = Some(classification.code);
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn with_circuit<K: Into<String>, S: fmt::Display>(mut self, circuit: K, state: S) -> Self {
        self.circuit = Some(circuit.into());
        self.circuit_state = Some(state.to_string());
        self
    }
}

/// Destination for audit entries
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Shared handle to a sink
pub type SharedAuditSink = Arc<dyn AuditSink>;

/// Discards every entry
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _entry: &AuditEntry) {}
}

/// Emits each entry as a `tracing` event under the `dbshield::audit` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: &AuditEntry) {
        let kind = entry.kind.map(ErrorKind::as_str);
        match entry.level {
            AuditLevel::Info => info!(
                target: "dbshield::audit",
                event = ?entry.event,
                kind,
                code = entry.code,
                attempt = entry.attempt,
                delay_ms = entry.delay_ms,
                circuit = entry.circuit.as_deref(),
                circuit_state = entry.circuit_state.as_deref(),
                "{}",
                entry.message
            ),
            AuditLevel::Warn => warn!(
                target: "dbshield::audit",
                event = ?entry.event,
                kind,
                code = entry.code,
                attempt = entry.attempt,
                delay_ms = entry.delay_ms,
                circuit = entry.circuit.as_deref(),
                circuit_state = entry.circuit_state.as_deref(),
                "{}",
                entry.message
            ),
            AuditLevel::Error => error!(
                target: "dbshield::audit",
                event = ?entry.event,
                kind,
                code = entry.code,
                attempt = entry.attempt,
                delay_ms = entry.delay_ms,
                circuit = entry.circuit.as_deref(),
                circuit_state = entry.circuit_state.as_deref(),
                "{}",
                entry.message
            ),
        }
    }
}

/// Bounded in-memory sink, oldest entries are evicted first
#[derive(Debug)]
pub struct MemoryAuditSink {
    capacity: usize,
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl MemoryAuditSink {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, entries: Mutex::new(VecDeque::with_capacity(capacity.min(64))) }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Entries produced by one kind of event
    pub fn events(&self, event: AuditEvent) -> Vec<AuditEntry> {
        self.entries.lock().iter().filter(|e| e.event == event).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: &AuditEntry) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry.clone());
    }
}

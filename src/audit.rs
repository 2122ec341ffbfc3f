//! Audit trail collaborator.
//!
//! Audit delivery is fire-and-forget: an [`AuditLog`] implementation must
//! never block the caller nor report failure back into the CRL engine.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLevel {
    Info,
    Warning,
    Failure,
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Failure => "FAILURE",
        };
        f.write_str(level)
    }
}

/// A single audit record emitted by an issuing point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub level: AuditLevel,
    pub issuing_point: String,
    pub event: &'static str,
    pub message: String,
}

impl AuditEvent {
    pub fn new(
        level: AuditLevel,
        issuing_point: impl Into<String>,
        event: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            issuing_point: issuing_point.into(),
            event,
            message: message.into(),
        }
    }
}

pub trait AuditLog: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit events to the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn record(&self, event: AuditEvent) {
        match event.level {
            AuditLevel::Info => info!(
                target: "audit",
                issuing_point = %event.issuing_point,
                event = event.event,
                "{}",
                event.message
            ),
            AuditLevel::Warning => warn!(
                target: "audit",
                issuing_point = %event.issuing_point,
                event = event.event,
                "{}",
                event.message
            ),
            AuditLevel::Failure => error!(
                target: "audit",
                issuing_point = %event.issuing_point,
                event = event.event,
                "{}",
                event.message
            ),
        }
    }
}

/// Keeps audit events in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

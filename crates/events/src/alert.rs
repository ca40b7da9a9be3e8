//! High-priority operator alerts.
//!
//! Alerts travel on a channel separate from user notifications so a failed
//! retry or a failed job is visible even while the notification bus is down.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::message::Severity;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: Severity,
    /// Component raising the alert, e.g. `job:consistency-reconciliation`.
    pub source: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn high(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::High,
            source: source.into(),
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}

/// Sink for operator alerts.
pub trait AlertSink: Send + Sync + 'static {
    fn raise(&self, alert: Alert);
}

/// Writes alerts to the structured log at `error` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn raise(&self, alert: Alert) {
        error!(
            severity = ?alert.severity,
            source = %alert.source,
            alert = %alert.message,
            "operator alert"
        );
    }
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAlertSink {
    inner: Mutex<Vec<Alert>>,
}

impl InMemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Alert> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl AlertSink for InMemoryAlertSink {
    fn raise(&self, alert: Alert) {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).push(alert);
    }
}

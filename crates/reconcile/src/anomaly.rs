//! Anomalies and the per-pass reports the reconciler aggregates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use acadbatch_batch::ContextKey;
use acadbatch_core::{DefenseId, EnrollmentId, ErrorKind};
use acadbatch_stores::{DefenseStatus, EnrollmentStatus};

/// Idempotent repair of one record in one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CorrectiveAction {
    SuspendEnrollment { id: EnrollmentId, from: EnrollmentStatus },
    BlockDefense { id: DefenseId, from: DefenseStatus },
    QuarantineArtifact { path: String },
}

impl CorrectiveAction {
    pub fn label(&self) -> &'static str {
        match self {
            CorrectiveAction::SuspendEnrollment { .. } => "SUSPEND_ENROLLMENT",
            CorrectiveAction::BlockDefense { .. } => "BLOCK_DEFENSE",
            CorrectiveAction::QuarantineArtifact { .. } => "QUARANTINE_ARTIFACT",
        }
    }
}

/// One detected violation. Written once, reported, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    pub invariant: String,
    pub record_id: String,
    pub detected_at: DateTime<Utc>,
    pub action: String,
    /// `None` when the guarded write matched nothing (already corrected
    /// elsewhere) or the pass ran in dry-run mode.
    pub corrected_at: Option<DateTime<Utc>>,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub pass: String,
    pub violations_found: u64,
    pub corrections_applied: u64,
    pub notifications_sent: u64,
    /// Staged in the outbox but not delivered; left for the retry sweeper.
    pub notifications_deferred: u64,
    pub anomalies: Vec<Anomaly>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl PassReport {
    pub fn new(pass: impl Into<String>) -> Self {
        Self {
            pass: pass.into(),
            ..Default::default()
        }
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn record(&mut self, anomaly: Anomaly) {
        self.violations_found += 1;
        if anomaly.corrected_at.is_some() {
            self.corrections_applied += 1;
        }
        self.anomalies.push(anomaly);
    }
}

/// Everything one reconciler step produced, in pass order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub passes: Vec<PassReport>,
}

impl ReconciliationSummary {
    pub fn violations_found(&self) -> u64 {
        self.passes.iter().map(|p| p.violations_found).sum()
    }

    pub fn corrections_applied(&self) -> u64 {
        self.passes.iter().map(|p| p.corrections_applied).sum()
    }

    pub fn notifications_sent(&self) -> u64 {
        self.passes.iter().map(|p| p.notifications_sent).sum()
    }

    pub fn failed_passes(&self) -> Vec<&str> {
        self.passes
            .iter()
            .filter(|p| p.failed())
            .map(|p| p.pass.as_str())
            .collect()
    }

    pub fn pass(&self, name: &str) -> Option<&PassReport> {
        self.passes.iter().find(|p| p.pass == name)
    }
}

/// Context keys the reconciler publishes for later steps.
pub mod keys {
    use super::*;

    pub fn summary() -> ContextKey<ReconciliationSummary> {
        ContextKey::new("reconciliation.summary")
    }

    pub fn violations_found() -> ContextKey<u64> {
        ContextKey::new("reconciliation.violations_found")
    }

    pub fn corrections_applied() -> ContextKey<u64> {
        ContextKey::new("reconciliation.corrections_applied")
    }
}

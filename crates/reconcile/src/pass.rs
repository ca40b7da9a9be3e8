//! Reconciliation passes.
//!
//! A pass is the reconciler's unit of failure: an error aborts only the pass
//! that raised it, and whatever it recorded before failing is kept.

use chrono::Utc;
use tracing::info;

use acadbatch_core::BatchError;
use acadbatch_events::{NotificationEvent, NotificationKey};

use crate::anomaly::{Anomaly, PassReport};
use crate::invariants::Invariant;
use crate::outbox::{Delivery, Outbox};

pub trait ReconciliationPass: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, report: &mut PassReport) -> Result<(), BatchError>;
}

/// Event type carried by violation notices.
pub const CONSISTENCY_VIOLATION: &str = "consistency-violation";

/// Detect → stage notice → guarded correction → deliver, for one invariant.
pub struct InvariantPass<I> {
    invariant: I,
    outbox: Outbox,
}

impl<I: Invariant> InvariantPass<I> {
    pub fn new(invariant: I, outbox: Outbox) -> Self {
        Self { invariant, outbox }
    }
}

impl<I: Invariant> ReconciliationPass for InvariantPass<I> {
    fn name(&self) -> &str {
        self.invariant.name()
    }

    fn run(&self, report: &mut PassReport) -> Result<(), BatchError> {
        let invariant = self.invariant.name();
        let violations = self.invariant.detect()?;
        info!(invariant, candidates = violations.len(), "invariant violations detected");

        for violation in violations {
            let detected_at = Utc::now();
            let event = NotificationEvent::new(CONSISTENCY_VIOLATION, violation.severity)
                .with_record(&violation.record_id)
                .with_action(violation.action.label())
                .with_recipients(violation.recipients.iter().copied())
                .with_detail(format!("{invariant}: {}", violation.detail));

            // Stage before correcting: a crash after the correction still
            // leaves a PENDING notice for the sweeper.
            let staged = self
                .outbox
                .stage(NotificationKey::for_violation(invariant, &violation.record_id), &event)?;

            let corrected = self.invariant.correct(&violation.action)?;
            report.record(Anomaly {
                invariant: invariant.to_string(),
                record_id: violation.record_id.clone(),
                detected_at,
                action: violation.action.label().to_string(),
                corrected_at: corrected.then(Utc::now),
            });

            match self.outbox.deliver(&staged)? {
                Delivery::Sent => report.notifications_sent += 1,
                Delivery::Deferred => report.notifications_deferred += 1,
                Delivery::AlreadySent => {}
            }
        }
        Ok(())
    }
}

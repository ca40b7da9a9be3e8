//! Consistency Reconciler task step.
//!
//! Runs its passes in order against stores that share no transaction. Each
//! pass is isolated: a failing pass is logged and recorded in the summary,
//! and the remaining passes still run. The step itself fails only when
//! every pass failed.

use tracing::{error, info};

use acadbatch_batch::{ExecutionContext, StepCounters, Tasklet};
use acadbatch_core::{BatchError, ErrorKind};

use crate::anomaly::{PassReport, ReconciliationSummary, keys};
use crate::pass::ReconciliationPass;

pub struct ConsistencyReconciler {
    passes: Vec<Box<dyn ReconciliationPass>>,
}

impl ConsistencyReconciler {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    pub fn with_pass(mut self, pass: impl ReconciliationPass + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run every pass once and collect their reports.
    pub fn reconcile(&self) -> ReconciliationSummary {
        let mut summary = ReconciliationSummary::default();
        for pass in &self.passes {
            let mut report = PassReport::new(pass.name());
            if let Err(e) = pass.run(&mut report) {
                error!(pass = pass.name(), kind = %e.kind(), error = %e, "reconciliation pass aborted");
                report.error = Some(e.to_string());
                report.error_kind = Some(e.kind());
            } else {
                info!(
                    pass = pass.name(),
                    found = report.violations_found,
                    corrected = report.corrections_applied,
                    notified = report.notifications_sent,
                    deferred = report.notifications_deferred,
                    "reconciliation pass finished"
                );
            }
            summary.passes.push(report);
        }
        summary
    }
}

impl Default for ConsistencyReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasklet for ConsistencyReconciler {
    fn execute(&self, counters: &mut StepCounters, context: &mut ExecutionContext) -> Result<(), BatchError> {
        let summary = self.reconcile();

        counters.read_count += summary.violations_found();
        counters.write_count += summary.corrections_applied();

        context.increment(&keys::violations_found(), summary.violations_found())?;
        context.increment(&keys::corrections_applied(), summary.corrections_applied())?;
        context.put(&keys::summary(), &summary)?;

        let failed = summary.failed_passes();
        if !self.passes.is_empty() && failed.len() == self.passes.len() {
            let kind = summary
                .passes
                .iter()
                .find_map(|p| p.error_kind)
                .unwrap_or(ErrorKind::Unclassified);
            return Err(BatchError::new(
                kind,
                format!("all reconciliation passes failed: {}", failed.join(", ")),
            ));
        }
        Ok(())
    }
}

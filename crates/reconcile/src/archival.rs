//! Enrollment archival: a chunk step moving long-closed enrollments to
//! ARCHIVED, and the maintenance tasklet purging delivered notifications.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::info;

use acadbatch_batch::{
    ContextKey, ExecutionContext, ItemProcessor, ItemReader, ItemStream, ItemWriter, StepCounters,
    Tasklet,
};
use acadbatch_core::BatchError;
use acadbatch_stores::{
    Enrollment, EnrollmentStatus, EnrollmentStore, EnrollmentTransition, NotificationStore,
    StatusTransition,
};

/// Candidate query: closed enrollments untouched for the retention period.
pub struct ClosedEnrollmentReader {
    enrollments: Arc<dyn EnrollmentStore>,
    retention: Duration,
}

impl ClosedEnrollmentReader {
    pub fn new(enrollments: Arc<dyn EnrollmentStore>, retention_years: u32) -> Self {
        Self {
            enrollments,
            retention: Duration::days(365 * i64::from(retention_years)),
        }
    }
}

impl ItemReader for ClosedEnrollmentReader {
    type Item = Enrollment;

    fn open(&self, _context: &ExecutionContext) -> Result<ItemStream<'_, Enrollment>, BatchError> {
        let cutoff = Utc::now() - self.retention;
        let rows = self.enrollments.closed_before(cutoff)?;
        Ok(Box::new(rows.into_iter().map(Ok)))
    }
}

/// Rejects enrollments under legal hold; everything else becomes a guarded
/// transition from the status the reader saw.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchivalProcessor;

impl ItemProcessor for ArchivalProcessor {
    type Input = Enrollment;
    type Output = EnrollmentTransition;

    fn process(&self, enrollment: &Enrollment) -> Result<Option<EnrollmentTransition>, BatchError> {
        if enrollment.legal_hold || !enrollment.status.is_closed() {
            return Ok(None);
        }
        Ok(Some(StatusTransition {
            id: enrollment.id,
            from: enrollment.status,
            to: EnrollmentStatus::Archived,
        }))
    }
}

/// Applies one chunk of transitions in a single store transaction.
pub struct ArchivalWriter {
    enrollments: Arc<dyn EnrollmentStore>,
}

impl ArchivalWriter {
    pub fn new(enrollments: Arc<dyn EnrollmentStore>) -> Self {
        Self { enrollments }
    }
}

impl ItemWriter for ArchivalWriter {
    type Item = EnrollmentTransition;

    fn write(&self, items: &[EnrollmentTransition]) -> Result<(), BatchError> {
        let changed = self.enrollments.apply_transitions(items)?;
        if changed < items.len() {
            info!(requested = items.len(), changed, "some enrollments were already archived or changed");
        }
        Ok(())
    }
}

pub fn purged_notifications_key() -> ContextKey<u64> {
    ContextKey::new("archival.notifications_purged")
}

/// Deletes SENT notifications older than the retention window. PENDING and
/// FAILED rows are never purged.
pub struct NotificationPurge {
    notifications: Arc<dyn NotificationStore>,
    retention: Duration,
}

impl NotificationPurge {
    pub fn new(notifications: Arc<dyn NotificationStore>, retention_days: u32) -> Self {
        Self {
            notifications,
            retention: Duration::days(i64::from(retention_days)),
        }
    }
}

impl Tasklet for NotificationPurge {
    fn execute(&self, counters: &mut StepCounters, context: &mut ExecutionContext) -> Result<(), BatchError> {
        let cutoff = Utc::now() - self.retention;
        let purged = self.notifications.purge_sent_before(cutoff)? as u64;
        counters.write_count += purged;
        context.increment(&purged_notifications_key(), purged)?;
        info!(purged, cutoff = %cutoff, "delivered notifications purged");
        Ok(())
    }
}

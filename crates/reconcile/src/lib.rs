//! Domain steps of the batch-coordination service.
//!
//! - [`reconciler`]: cross-store consistency reconciliation (invariants,
//!   role sync, orphan artifacts), one isolated pass at a time
//! - [`sweeper`]: redelivery of stuck notifications
//! - [`archival`]: enrollment archival and notification retention
//! - [`jobs`]: the job definitions the scheduler fires

pub mod alerting;
pub mod anomaly;
pub mod archival;
pub mod invariants;
pub mod jobs;
pub mod orphans;
pub mod outbox;
pub mod pass;
pub mod reconciler;
pub mod report;
pub mod roles;
pub mod sweeper;

pub use alerting::JobFailureAlertListener;
pub use anomaly::{Anomaly, CorrectiveAction, PassReport, ReconciliationSummary};
pub use invariants::{
    DefenseEnrollmentInvariant, EnrollmentDurationInvariant, Invariant, UserEnrollmentInvariant,
    Violation,
};
pub use jobs::{
    CONSISTENCY_RECONCILIATION, Collaborators, ENROLLMENT_ARCHIVAL, JobSettings, NOTIFICATION_RETRY,
    all_jobs, consistency_reconciliation_job, consistency_reconciler, enrollment_archival_job,
    notification_retry_job,
};
pub use orphans::{OrphanArtifactPass, references_file};
pub use outbox::{Delivery, Outbox};
pub use pass::{InvariantPass, ReconciliationPass};
pub use reconciler::ConsistencyReconciler;
pub use report::{JobReport, ReportAssembler};
pub use roles::{RoleSyncPass, role_delta};
pub use sweeper::{NotificationRetrySweeper, SweepReport};

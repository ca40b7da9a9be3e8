//! The jobs this service runs, wired from store accessors and settings.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;

use acadbatch_batch::{
    BackoffPolicy, ChunkStep, FaultTolerance, Job, JobDefinitionError, RetryPolicy, Sleeper,
    SkipPolicy, TaskStep, ThreadSleeper, UnclassifiedPolicy,
};
use acadbatch_core::BatchError;
use acadbatch_events::{AlertSink, EventBus, OutboundMessage};
use acadbatch_stores::{
    AccountStore, ArtifactStorage, DEFAULT_QUARANTINE_DIR, DefenseStore, EnrollmentStore,
    NotificationStore, PathReferenceSource,
};

use crate::archival::{ArchivalProcessor, ArchivalWriter, ClosedEnrollmentReader, NotificationPurge};
use crate::invariants::{DefenseEnrollmentInvariant, EnrollmentDurationInvariant, UserEnrollmentInvariant};
use crate::orphans::OrphanArtifactPass;
use crate::outbox::Outbox;
use crate::pass::InvariantPass;
use crate::reconciler::ConsistencyReconciler;
use crate::report::ReportAssembler;
use crate::roles::RoleSyncPass;
use crate::sweeper::NotificationRetrySweeper;

pub const ENROLLMENT_ARCHIVAL: &str = "enrollment-archival";
pub const CONSISTENCY_RECONCILIATION: &str = "consistency-reconciliation";
pub const NOTIFICATION_RETRY: &str = "notification-retry";

/// Tunables consumed by the job definitions.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub chunk_size: usize,
    pub skip_limit: u64,
    pub retry: RetryPolicy,
    pub backoff: BackoffPolicy,
    pub unclassified: UnclassifiedPolicy,
    pub closed_retention_years: u32,
    pub notification_retention_days: u32,
    pub enrollment_duration_limit_years: u32,
    pub artifact_root: PathBuf,
    pub quarantine_dir: String,
    pub dry_run: bool,
    pub staleness: ChronoDuration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            skip_limit: 10,
            retry: RetryPolicy::default(),
            backoff: BackoffPolicy::default(),
            unclassified: UnclassifiedPolicy::default(),
            closed_retention_years: 5,
            notification_retention_days: 90,
            enrollment_duration_limit_years: 6,
            artifact_root: PathBuf::from("uploads"),
            quarantine_dir: DEFAULT_QUARANTINE_DIR.to_string(),
            dry_run: false,
            staleness: ChronoDuration::hours(24),
        }
    }
}

impl JobSettings {
    pub fn fault_tolerance(&self) -> FaultTolerance {
        FaultTolerance::new(
            self.retry.clone(),
            self.backoff.clone(),
            SkipPolicy::with_limit(self.skip_limit),
        )
        .with_unclassified(self.unclassified)
    }
}

/// Shared collaborators every job draws from.
#[derive(Clone)]
pub struct Collaborators {
    pub enrollments: Arc<dyn EnrollmentStore>,
    pub defenses: Arc<dyn DefenseStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub reference_sources: Vec<Arc<dyn PathReferenceSource>>,
    pub bus: Arc<dyn EventBus<OutboundMessage>>,
    pub alerts: Arc<dyn AlertSink>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl Collaborators {
    /// Collaborators with a real sleeper; replace `sleeper` in tests.
    pub fn new(
        enrollments: Arc<dyn EnrollmentStore>,
        defenses: Arc<dyn DefenseStore>,
        accounts: Arc<dyn AccountStore>,
        notifications: Arc<dyn NotificationStore>,
        bus: Arc<dyn EventBus<OutboundMessage>>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            enrollments,
            defenses,
            accounts,
            notifications,
            reference_sources: Vec::new(),
            bus,
            alerts,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_reference_source(mut self, source: Arc<dyn PathReferenceSource>) -> Self {
        self.reference_sources.push(source);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

fn definition_error(err: JobDefinitionError) -> BatchError {
    BatchError::configuration(err.to_string())
}

/// archive closed enrollments (chunk) → purge delivered notifications → report.
pub fn enrollment_archival_job(c: &Collaborators, s: &JobSettings) -> Result<Job, BatchError> {
    let archive = ChunkStep::new(
        "archive-closed-enrollments",
        ClosedEnrollmentReader::new(c.enrollments.clone(), s.closed_retention_years),
        ArchivalProcessor,
        ArchivalWriter::new(c.enrollments.clone()),
        s.chunk_size,
    )?
    .with_fault_tolerance(s.fault_tolerance())
    .with_sleeper(c.sleeper.clone());

    Job::builder(ENROLLMENT_ARCHIVAL)
        .step(archive)
        .step(TaskStep::new(
            "purge-delivered-notifications",
            NotificationPurge::new(c.notifications.clone(), s.notification_retention_days),
        ))
        .step(TaskStep::new("assemble-report", ReportAssembler::new(c.bus.clone())))
        .build()
        .map_err(definition_error)
}

/// The reconciler with every pass, in execution order.
pub fn consistency_reconciler(c: &Collaborators, s: &JobSettings) -> ConsistencyReconciler {
    let outbox = Outbox::new(c.notifications.clone(), c.bus.clone());
    let storage = ArtifactStorage::with_quarantine_dir(&s.artifact_root, s.quarantine_dir.clone());

    ConsistencyReconciler::new()
        .with_pass(InvariantPass::new(
            UserEnrollmentInvariant::new(c.enrollments.clone(), c.accounts.clone()),
            outbox.clone(),
        ))
        .with_pass(InvariantPass::new(
            DefenseEnrollmentInvariant::new(c.defenses.clone(), c.enrollments.clone(), c.accounts.clone()),
            outbox.clone(),
        ))
        .with_pass(InvariantPass::new(
            EnrollmentDurationInvariant::new(
                c.enrollments.clone(),
                c.defenses.clone(),
                s.enrollment_duration_limit_years,
            ),
            outbox,
        ))
        .with_pass(RoleSyncPass::new(c.accounts.clone(), c.enrollments.clone(), c.defenses.clone()))
        .with_pass(OrphanArtifactPass::new(storage, c.reference_sources.clone()).dry_run(s.dry_run))
}

/// reconcile (all passes) → report.
pub fn consistency_reconciliation_job(c: &Collaborators, s: &JobSettings) -> Result<Job, BatchError> {
    Job::builder(CONSISTENCY_RECONCILIATION)
        .step(TaskStep::new("reconcile", consistency_reconciler(c, s)))
        .step(TaskStep::new("assemble-report", ReportAssembler::new(c.bus.clone())))
        .build()
        .map_err(definition_error)
}

/// sweep stale PENDING notifications.
pub fn notification_retry_job(c: &Collaborators, s: &JobSettings) -> Result<Job, BatchError> {
    let sweeper = NotificationRetrySweeper::new(
        c.notifications.clone(),
        c.bus.clone(),
        c.alerts.clone(),
        s.staleness,
    )
    .with_fault_tolerance(s.fault_tolerance())
    .with_sleeper(c.sleeper.clone());

    Job::builder(NOTIFICATION_RETRY)
        .step(TaskStep::new("sweep-stale-notifications", sweeper))
        .build()
        .map_err(definition_error)
}

pub fn all_jobs(c: &Collaborators, s: &JobSettings) -> Result<Vec<Job>, BatchError> {
    Ok(vec![
        enrollment_archival_job(c, s)?,
        consistency_reconciliation_job(c, s)?,
        notification_retry_job(c, s)?,
    ])
}

//! Cross-store scenarios run through the real job definitions.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};

use acadbatch_batch::{InMemoryExecutionHistory, JobOrchestrator, JobStatus, RecordingSleeper};
use acadbatch_core::{AccountId, RunKey, Role};
use acadbatch_events::{
    EventBus, InMemoryAlertSink, InMemoryEventBus, NotificationEvent, NotificationKey, OutboundMessage,
    Subscription, topics,
};
use acadbatch_reconcile::invariants::{DEFENSE_ENROLLMENT, USER_ENROLLMENT};
use acadbatch_reconcile::orphans::ORPHAN_ARTIFACTS;
use acadbatch_reconcile::roles::ROLE_SYNC;
use acadbatch_reconcile::{
    CONSISTENCY_RECONCILIATION, Collaborators, ENROLLMENT_ARCHIVAL, JobFailureAlertListener,
    JobReport, JobSettings, NOTIFICATION_RETRY, all_jobs, consistency_reconciler,
};
use acadbatch_stores::{
    Account, AccountStore, DefenseRequest, DefenseStatus, DefenseStore, Enrollment, EnrollmentStatus,
    EnrollmentStore, InMemoryAccountStore, InMemoryDefenseStore, InMemoryEnrollmentStore,
    InMemoryNotificationStore, NotificationStatus, NotificationStore,
};

struct World {
    enrollments: Arc<InMemoryEnrollmentStore>,
    defenses: Arc<InMemoryDefenseStore>,
    accounts: Arc<InMemoryAccountStore>,
    notifications: Arc<InMemoryNotificationStore>,
    bus: Arc<InMemoryEventBus<OutboundMessage>>,
    alerts: Arc<InMemoryAlertSink>,
    admin: AccountId,
    _dir: tempfile::TempDir,
    uploads: PathBuf,
    settings: JobSettings,
}

impl World {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        fs::create_dir_all(&uploads).unwrap();

        let accounts = InMemoryAccountStore::arc();
        let admin = accounts.insert(Account::new("admin@uni.test").with_role(Role::ADMINISTRATOR));

        let settings = JobSettings {
            artifact_root: uploads.clone(),
            ..JobSettings::default()
        };

        Self {
            enrollments: InMemoryEnrollmentStore::arc(),
            defenses: InMemoryDefenseStore::arc(),
            accounts,
            notifications: InMemoryNotificationStore::arc(),
            bus: Arc::new(InMemoryEventBus::<OutboundMessage>::new()),
            alerts: Arc::new(InMemoryAlertSink::new()),
            admin,
            _dir: dir,
            uploads,
            settings,
        }
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators::new(
            self.enrollments.clone(),
            self.defenses.clone(),
            self.accounts.clone(),
            self.notifications.clone(),
            self.bus.clone(),
            self.alerts.clone(),
        )
        .with_reference_source(self.enrollments.clone())
        .with_reference_source(self.defenses.clone())
        .with_sleeper(Arc::new(RecordingSleeper::new()))
    }

    fn orchestrator(&self) -> JobOrchestrator<Arc<InMemoryExecutionHistory>> {
        let mut orchestrator = JobOrchestrator::new(InMemoryExecutionHistory::arc())
            .with_listener(Arc::new(JobFailureAlertListener::new(self.alerts.clone())));
        for job in all_jobs(&self.collaborators(), &self.settings).unwrap() {
            orchestrator.register(job).unwrap();
        }
        orchestrator
    }

    fn candidate(&self, email: &str) -> AccountId {
        self.accounts.insert(Account::new(email))
    }
}

fn on_topic(sub: &Subscription<OutboundMessage>, topic: &str) -> Vec<OutboundMessage> {
    sub.drain().into_iter().filter(|m| m.topic == topic).collect()
}

#[test]
fn enrollment_with_missing_account_is_suspended_and_notified_once() {
    let world = World::new();
    let sub = world.bus.subscribe();
    let e = world
        .enrollments
        .insert(Enrollment::new(AccountId::new(), EnrollmentStatus::Validated, Utc::now()));

    let exec = world
        .orchestrator()
        .run(CONSISTENCY_RECONCILIATION, RunKey::new("r1"))
        .unwrap();

    assert_eq!(exec.status, JobStatus::Completed);
    assert_eq!(world.enrollments.get(e).unwrap().unwrap().status, EnrollmentStatus::Suspended);

    let key = NotificationKey::for_violation(USER_ENROLLMENT, e);
    assert_eq!(key.as_str(), format!("user-enrollment:{e}"));
    let sent: Vec<_> = on_topic(&sub, topics::NOTIFICATIONS)
        .into_iter()
        .filter(|m| m.key == key)
        .collect();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        world.notifications.get_by_key(&key).unwrap().unwrap().status,
        NotificationStatus::Sent
    );
}

#[test]
fn defense_on_submitted_enrollment_is_blocked_and_supervisor_and_admin_notified() {
    let world = World::new();
    let sub = world.bus.subscribe();
    let candidate = world.candidate("c@uni.test");
    let supervisor = world.candidate("s@uni.test");
    let i = world
        .enrollments
        .insert(Enrollment::new(candidate, EnrollmentStatus::Submitted, Utc::now()));
    let d = world.defenses.insert(
        DefenseRequest::new(i, candidate, DefenseStatus::Scheduled).with_supervisor(supervisor),
    );

    world
        .orchestrator()
        .run(CONSISTENCY_RECONCILIATION, RunKey::new("r1"))
        .unwrap();

    assert_eq!(world.defenses.get(d).unwrap().unwrap().status, DefenseStatus::Blocked);
    let key = NotificationKey::for_violation(DEFENSE_ENROLLMENT, d);
    let message = on_topic(&sub, topics::NOTIFICATIONS)
        .into_iter()
        .find(|m| m.key == key)
        .unwrap();
    let event: NotificationEvent = serde_json::from_value(message.payload).unwrap();
    assert!(event.recipients.contains(&supervisor));
    assert!(event.recipients.contains(&world.admin));
    assert_eq!(event.corrective_action.as_deref(), Some("BLOCK_DEFENSE"));
    assert_eq!(event.record_ids, vec![d.to_string()]);
}

#[test]
fn validated_candidate_gains_role_exactly_once() {
    let world = World::new();
    let candidate = world.candidate("c@uni.test");
    world
        .enrollments
        .insert(Enrollment::new(candidate, EnrollmentStatus::Validated, Utc::now()));
    let reconciler = consistency_reconciler(&world.collaborators(), &world.settings);

    let first = reconciler.reconcile();
    let second = reconciler.reconcile();

    assert_eq!(first.pass(ROLE_SYNC).unwrap().corrections_applied, 1);
    assert_eq!(second.pass(ROLE_SYNC).unwrap().violations_found, 0);
    let roles = world.accounts.get(candidate).unwrap().unwrap().roles;
    assert_eq!(roles.iter().filter(|r| **r == Role::ACTIVE_CANDIDATE).count(), 1);
}

#[test]
fn orphan_file_is_quarantined_never_deleted() {
    let world = World::new();
    let candidate = world.candidate("c@uni.test");
    world.enrollments.insert(
        Enrollment::new(candidate, EnrollmentStatus::Validated, Utc::now())
            .with_document("uploads/thesis.pdf"),
    );
    fs::write(world.uploads.join("x.pdf"), b"orphan").unwrap();
    fs::write(world.uploads.join("thesis.pdf"), b"kept").unwrap();

    let summary = consistency_reconciler(&world.collaborators(), &world.settings).reconcile();

    let orphans = summary.pass(ORPHAN_ARTIFACTS).unwrap();
    assert_eq!(orphans.violations_found, 1);
    assert_eq!(orphans.anomalies[0].record_id, "x.pdf");
    assert!(!world.uploads.join("x.pdf").exists());
    assert_eq!(fs::read(world.uploads.join("quarantine/x.pdf")).unwrap(), b"orphan");
    assert!(world.uploads.join("thesis.pdf").exists());
}

#[test]
fn second_run_finds_nothing_and_sends_nothing() {
    let world = World::new();
    let sub = world.bus.subscribe();
    let candidate = world.candidate("c@uni.test");
    let submitted = world
        .enrollments
        .insert(Enrollment::new(candidate, EnrollmentStatus::Submitted, Utc::now()));
    world
        .enrollments
        .insert(Enrollment::new(AccountId::new(), EnrollmentStatus::Submitted, Utc::now()));
    world
        .defenses
        .insert(DefenseRequest::new(submitted, candidate, DefenseStatus::Pending));
    fs::write(world.uploads.join("x.pdf"), b"orphan").unwrap();
    let reconciler = consistency_reconciler(&world.collaborators(), &world.settings);

    let first = reconciler.reconcile();
    let first_notices = on_topic(&sub, topics::NOTIFICATIONS).len();
    let second = reconciler.reconcile();

    assert!(first.violations_found() >= 3);
    assert_eq!(first_notices, 2);
    assert_eq!(second.violations_found(), 0);
    assert!(on_topic(&sub, topics::NOTIFICATIONS).is_empty());
    assert_eq!(world.notifications.all().len(), 2);
}

#[test]
fn bus_outage_leaves_notice_pending_until_the_sweeper_delivers_it() {
    let mut world = World::new();
    world.settings.staleness = ChronoDuration::milliseconds(1);
    let sub = world.bus.subscribe();
    let e = world
        .enrollments
        .insert(Enrollment::new(AccountId::new(), EnrollmentStatus::Submitted, Utc::now()));
    let orchestrator = world.orchestrator();

    world.bus.set_available(false);
    let exec = orchestrator.run(CONSISTENCY_RECONCILIATION, RunKey::new("r1")).unwrap();
    // The report step cannot publish either, so the job fails, but the
    // correction and the staged notice survive.
    assert_eq!(exec.status, JobStatus::Failed);
    assert_eq!(exec.failure.as_ref().unwrap().step_name, "assemble-report");
    assert_eq!(world.enrollments.get(e).unwrap().unwrap().status, EnrollmentStatus::Suspended);
    let key = NotificationKey::for_violation(USER_ENROLLMENT, e);
    assert_eq!(
        world.notifications.get_by_key(&key).unwrap().unwrap().status,
        NotificationStatus::Pending
    );

    world.bus.set_available(true);
    std::thread::sleep(std::time::Duration::from_millis(5));
    let exec = orchestrator.run(NOTIFICATION_RETRY, RunKey::new("s1")).unwrap();

    assert_eq!(exec.status, JobStatus::Completed);
    let delivered = on_topic(&sub, topics::NOTIFICATIONS);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].key, key);
    assert_eq!(
        world.notifications.get_by_key(&key).unwrap().unwrap().status,
        NotificationStatus::Sent
    );
}

#[test]
fn total_store_outage_fails_the_job_and_raises_an_alert() {
    let world = World::new();
    world.enrollments.faults().set_unavailable(true);
    world.defenses.faults().set_unavailable(true);
    world.accounts.faults().set_unavailable(true);

    let exec = world
        .orchestrator()
        .run(CONSISTENCY_RECONCILIATION, RunKey::new("r1"))
        .unwrap();

    assert_eq!(exec.status, JobStatus::Failed);
    assert!(exec.step("assemble-report").is_none());
    let alerts = world.alerts.all();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0]
        .message
        .starts_with("job consistency-reconciliation failed: step reconcile, reason"));
}

#[test]
fn archival_job_archives_old_closed_enrollments_and_reports() {
    let world = World::new();
    let sub = world.bus.subscribe();
    let long_ago = Utc::now() - ChronoDuration::days(365 * 8);
    let old = world
        .enrollments
        .insert(Enrollment::new(AccountId::new(), EnrollmentStatus::Completed, long_ago));
    let held = world.enrollments.insert(
        Enrollment::new(AccountId::new(), EnrollmentStatus::Rejected, long_ago).on_legal_hold(),
    );
    let recent = world
        .enrollments
        .insert(Enrollment::new(AccountId::new(), EnrollmentStatus::Completed, Utc::now()));

    let exec = world
        .orchestrator()
        .run(ENROLLMENT_ARCHIVAL, RunKey::new("a1"))
        .unwrap();

    assert_eq!(exec.status, JobStatus::Completed);
    let status = |id| world.enrollments.get(id).unwrap().unwrap().status;
    assert_eq!(status(old), EnrollmentStatus::Archived);
    assert_eq!(status(held), EnrollmentStatus::Rejected);
    assert_eq!(status(recent), EnrollmentStatus::Completed);

    let archive = exec.step("archive-closed-enrollments").unwrap();
    assert_eq!(archive.read_count(), 2);
    assert_eq!(archive.counters.filter_count, 1);
    assert_eq!(archive.write_count(), 1);

    let reports = on_topic(&sub, topics::REPORTS);
    assert_eq!(reports.len(), 1);
    let report: JobReport = serde_json::from_value(reports[0].payload.clone()).unwrap();
    assert_eq!(report.job_name, ENROLLMENT_ARCHIVAL);
    let names: Vec<_> = report.steps.iter().map(|s| s.step_name.as_str()).collect();
    assert_eq!(names, vec!["archive-closed-enrollments", "purge-delivered-notifications"]);
}

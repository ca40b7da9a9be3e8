//! Builds the orchestrator and scheduler from configuration.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use acadbatch_batch::{ExecutionHistory, InMemoryExecutionHistory, JobOrchestrator, LoggingListener};
use acadbatch_events::{
    AlertSink, ConsumerHandle, DedupConsumer, DeliveryLedger, InMemoryEventBus, LogAlertSink,
    NotificationEvent, OutboundMessage, topics,
};
use acadbatch_infra::{BatchConfig, PostgresExecutionHistory, Scheduler, SchedulerConfig};
use acadbatch_reconcile::{Collaborators, JobFailureAlertListener, JobSettings, all_jobs};
use acadbatch_stores::{
    InMemoryAccountStore, InMemoryDefenseStore, InMemoryEnrollmentStore, InMemoryNotificationStore,
};

pub type SharedHistory = Arc<dyn ExecutionHistory>;
pub type Orchestrator = JobOrchestrator<SharedHistory>;

/// Collaborators backed by the in-process stores and bus.
pub fn in_memory_collaborators() -> Collaborators {
    let enrollments = InMemoryEnrollmentStore::arc();
    let defenses = InMemoryDefenseStore::arc();
    Collaborators::new(
        enrollments.clone(),
        defenses.clone(),
        InMemoryAccountStore::arc(),
        InMemoryNotificationStore::arc(),
        Arc::new(InMemoryEventBus::<OutboundMessage>::new()),
        Arc::new(LogAlertSink),
    )
    .with_reference_source(enrollments)
    .with_reference_source(defenses)
}

/// Log each notification once per key, however often the outbox and
/// sweeper redeliver it. Stands in for the mail relay.
pub fn spawn_notification_log(collaborators: &Collaborators) -> anyhow::Result<ConsumerHandle> {
    let handle = DedupConsumer::spawn(
        "notification-log",
        collaborators.bus.as_ref(),
        topics::NOTIFICATIONS,
        Arc::new(DeliveryLedger::new()),
        |msg: OutboundMessage| -> Result<(), serde_json::Error> {
            let event: NotificationEvent = serde_json::from_value(msg.payload)?;
            info!(
                key = %msg.key,
                event_type = %event.event_type,
                severity = ?event.severity,
                recipients = event.recipients.len(),
                "notification delivered"
            );
            Ok(())
        },
    )
    .context("starting notification consumer")?;
    Ok(handle)
}

/// Job settings for a process running on [`in_memory_collaborators`].
///
/// Those stores start empty, so every file under the artifact root would look
/// unreferenced; the orphan pass is forced into dry-run.
pub fn in_memory_settings(config: &BatchConfig) -> JobSettings {
    let mut settings = config.job_settings();
    if !settings.dry_run {
        warn!(
            artifact_root = %settings.artifact_root.display(),
            "in-memory stores hold no path references; orphan artifacts are reported, not quarantined"
        );
        settings.dry_run = true;
    }
    settings
}

/// Postgres history when `database_url` is configured, otherwise in-memory.
pub async fn execution_history(config: &BatchConfig) -> anyhow::Result<SharedHistory> {
    let Some(url) = config.database_url.as_deref() else {
        warn!("DATABASE_URL not set; execution history is kept in memory");
        return Ok(Arc::new(InMemoryExecutionHistory::new()));
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.scheduler.workers as u32 + 1)
        .connect(url)
        .await
        .context("connecting to execution history database")?;
    let history = PostgresExecutionHistory::new(pool)?;
    history.migrate().await?;
    info!("using postgres execution history");
    Ok(history.arc())
}

/// Register every job plus the logging and failure-alert listeners.
pub fn build_orchestrator(
    settings: &JobSettings,
    collaborators: &Collaborators,
    history: SharedHistory,
) -> anyhow::Result<Orchestrator> {
    let alerts: Arc<dyn AlertSink> = collaborators.alerts.clone();
    let mut orchestrator = JobOrchestrator::new(history)
        .with_listener(Arc::new(LoggingListener))
        .with_listener(Arc::new(JobFailureAlertListener::new(alerts)));
    for job in all_jobs(collaborators, settings)? {
        orchestrator.register(job)?;
    }
    Ok(orchestrator)
}

/// Attach the configured intervals to a scheduler.
pub fn build_scheduler(
    config: &BatchConfig,
    orchestrator: Arc<Orchestrator>,
) -> anyhow::Result<(Scheduler<SharedHistory>, SchedulerConfig)> {
    let mut scheduler = Scheduler::new(orchestrator);
    for (job, every) in config.schedules() {
        scheduler = scheduler
            .every(&job, every)
            .with_context(|| format!("scheduling '{job}'"))?;
    }
    let scheduler_config = SchedulerConfig::default()
        .with_name("acadbatch")
        .with_workers(config.scheduler.workers);
    Ok((scheduler, scheduler_config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use acadbatch_batch::JobStatus;
    use acadbatch_core::RunKey;
    use acadbatch_reconcile::{CONSISTENCY_RECONCILIATION, ENROLLMENT_ARCHIVAL, NOTIFICATION_RETRY};

    fn config(root: &std::path::Path) -> BatchConfig {
        let mut config = BatchConfig::default();
        config.reconciliation.artifact_root = root.to_path_buf();
        config
    }

    #[test]
    fn registers_all_jobs_and_schedules() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let orchestrator = build_orchestrator(
            &in_memory_settings(&config),
            &in_memory_collaborators(),
            Arc::new(InMemoryExecutionHistory::new()),
        )
        .unwrap();
        assert_eq!(
            orchestrator.job_names(),
            vec![CONSISTENCY_RECONCILIATION, ENROLLMENT_ARCHIVAL, NOTIFICATION_RETRY]
        );

        let (scheduler, scheduler_config) = build_scheduler(&config, Arc::new(orchestrator)).unwrap();
        assert_eq!(scheduler.schedules().len(), 3);
        assert_eq!(scheduler_config.workers, 2);
    }

    #[test]
    fn empty_stores_reconcile_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = build_orchestrator(
            &in_memory_settings(&config(dir.path())),
            &in_memory_collaborators(),
            Arc::new(InMemoryExecutionHistory::new()),
        )
        .unwrap();

        for job in [CONSISTENCY_RECONCILIATION, ENROLLMENT_ARCHIVAL, NOTIFICATION_RETRY] {
            let execution = orchestrator.run(job, RunKey::new("smoke")).unwrap();
            assert_eq!(execution.status, JobStatus::Completed, "{job}: {:?}", execution.failure);
        }
    }

    #[test]
    fn in_memory_wiring_never_quarantines_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("thesis.pdf"), b"%PDF").unwrap();
        let config = config(dir.path());
        assert!(!config.reconciliation.dry_run);

        let settings = in_memory_settings(&config);
        assert!(settings.dry_run);

        let orchestrator = build_orchestrator(
            &settings,
            &in_memory_collaborators(),
            Arc::new(InMemoryExecutionHistory::new()),
        )
        .unwrap();
        let execution = orchestrator
            .run(CONSISTENCY_RECONCILIATION, RunKey::new("dry"))
            .unwrap();

        assert_eq!(execution.status, JobStatus::Completed);
        assert!(dir.path().join("thesis.pdf").exists());
        assert!(!dir.path().join("quarantine").exists());
    }

    #[test]
    fn notification_log_ignores_redelivery() {
        use acadbatch_events::{EventBus, NotificationKey, Severity};

        let collaborators = in_memory_collaborators();
        let handle = spawn_notification_log(&collaborators).unwrap();
        let payload = NotificationEvent::new("consistency-violation", Severity::High)
            .with_record("E-1")
            .to_json()
            .unwrap();
        let notice = OutboundMessage::new(
            topics::NOTIFICATIONS,
            NotificationKey::for_violation("user-enrollment", "E-1"),
            payload,
        );
        collaborators.bus.publish(notice.clone()).unwrap();
        collaborators.bus.publish(notice).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while handle.ledger().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(handle.ledger().len(), 1);
        handle.shutdown();
    }
}

//! Notification Retry Sweeper task step.
//!
//! Picks PENDING notifications older than the staleness window and tries to
//! deliver each again. Retryable bus errors are retried with backoff inside
//! the same run; when delivery still fails the notification becomes FAILED
//! and a high-priority alert is raised.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use acadbatch_batch::{
    ContextKey, ExecutionContext, FaultDecision, FaultTolerance, Sleeper, StepCounters, Tasklet,
    ThreadSleeper,
};
use acadbatch_core::BatchError;
use acadbatch_events::{Alert, AlertSink, EventBus, OutboundMessage};
use acadbatch_stores::{Notification, NotificationStore};

pub const SWEEPER_SOURCE: &str = "notification-retry-sweeper";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub stale: u64,
    pub sent: u64,
    pub failed: u64,
    /// Rows another writer moved out of PENDING while we were delivering.
    pub raced: u64,
}

pub fn sweep_report_key() -> ContextKey<SweepReport> {
    ContextKey::new("sweeper.report")
}

pub struct NotificationRetrySweeper {
    notifications: Arc<dyn NotificationStore>,
    bus: Arc<dyn EventBus<OutboundMessage>>,
    alerts: Arc<dyn AlertSink>,
    staleness: ChronoDuration,
    tolerance: FaultTolerance,
    sleeper: Arc<dyn Sleeper>,
}

impl NotificationRetrySweeper {
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        bus: Arc<dyn EventBus<OutboundMessage>>,
        alerts: Arc<dyn AlertSink>,
        staleness: ChronoDuration,
    ) -> Self {
        Self {
            notifications,
            bus,
            alerts,
            staleness,
            tolerance: FaultTolerance::default(),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_fault_tolerance(mut self, tolerance: FaultTolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Publish with retry; returns the last error when delivery gave up.
    fn redeliver(&self, notification: &Notification) -> Result<Result<(), BatchError>, BatchError> {
        let mut retries = 0;
        loop {
            let err = match self.bus.publish(notification.to_message()) {
                Ok(()) => return Ok(Ok(())),
                Err(e) => BatchError::from(e),
            };
            self.notifications.record_attempt(notification.id, &err.to_string())?;
            match self.tolerance.decide(&err, retries, 0) {
                FaultDecision::Retry { attempt, delay } => {
                    warn!(key = %notification.key, attempt, delay_ms = delay.as_millis() as u64, error = %err, "redelivery failed; backing off");
                    self.sleeper.sleep(delay);
                    retries = attempt;
                }
                FaultDecision::Skip | FaultDecision::Fail(_) => return Ok(Err(err)),
            }
        }
    }

    pub fn sweep(&self) -> Result<SweepReport, BatchError> {
        let cutoff = Utc::now() - self.staleness;
        let stale = self.notifications.pending_older_than(cutoff)?;
        let mut report = SweepReport {
            stale: stale.len() as u64,
            ..Default::default()
        };

        for notification in &stale {
            match self.redeliver(notification)? {
                Ok(()) => {
                    if self.notifications.mark_sent(notification.id)? {
                        report.sent += 1;
                    } else {
                        report.raced += 1;
                    }
                }
                Err(err) => {
                    if self.notifications.mark_failed(notification.id, &err.to_string())? {
                        report.failed += 1;
                        self.alerts.raise(Alert::high(
                            SWEEPER_SOURCE,
                            format!("notification {} could not be delivered: {err}", notification.key),
                        ));
                    } else {
                        report.raced += 1;
                    }
                }
            }
        }
        Ok(report)
    }
}

impl Tasklet for NotificationRetrySweeper {
    fn execute(&self, counters: &mut StepCounters, context: &mut ExecutionContext) -> Result<(), BatchError> {
        let report = self.sweep()?;
        info!(
            stale = report.stale,
            sent = report.sent,
            failed = report.failed,
            "notification sweep finished"
        );
        counters.read_count += report.stale;
        counters.write_count += report.sent + report.failed;
        context.put(&sweep_report_key(), &report)?;
        Ok(())
    }
}

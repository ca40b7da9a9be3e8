//! Observers invoked synchronously at job lifecycle points.

use tracing::{error, info, warn};

use crate::context::ExecutionContext;
use crate::execution::{JobExecution, JobStatus, StepExecution, StepStatus};

/// Lifecycle hooks. All methods default to no-ops.
///
/// Called in registration order on the executing worker thread; a slow
/// listener delays the job.
pub trait JobListener: Send + Sync {
    fn before_job(&self, _execution: &JobExecution) {}

    fn before_step(&self, _execution: &JobExecution, _step_name: &str) {}

    fn after_step(&self, _execution: &JobExecution, _step: &StepExecution) {}

    /// Fired once the execution reached COMPLETED or FAILED, before its
    /// context is discarded.
    fn after_job(&self, _execution: &JobExecution, _context: &ExecutionContext) {}
}

/// Emits structured log lines for every lifecycle transition.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl JobListener for LoggingListener {
    fn before_job(&self, execution: &JobExecution) {
        info!(job = %execution.job_name, run_key = %execution.run_key, execution_id = %execution.id, "job started");
    }

    fn after_step(&self, execution: &JobExecution, step: &StepExecution) {
        match step.status {
            StepStatus::Failed => warn!(
                job = %execution.job_name,
                step = %step.step_name,
                error = ?step.error,
                "step failed"
            ),
            _ => info!(
                job = %execution.job_name,
                step = %step.step_name,
                read = step.read_count(),
                written = step.write_count(),
                skipped = step.skip_count(),
                "step completed"
            ),
        }
    }

    fn after_job(&self, execution: &JobExecution, _context: &ExecutionContext) {
        match execution.status {
            JobStatus::Failed => {
                let (step, reason) = execution
                    .failure
                    .as_ref()
                    .map(|f| (f.step_name.as_str(), f.reason.as_str()))
                    .unwrap_or(("<unknown>", "<unknown>"));
                error!(job = %execution.job_name, run_key = %execution.run_key, step, reason, "job failed");
            }
            _ => info!(
                job = %execution.job_name,
                run_key = %execution.run_key,
                status = %execution.status,
                duration_ms = execution.duration_ms().unwrap_or(0),
                "job finished"
            ),
        }
    }
}

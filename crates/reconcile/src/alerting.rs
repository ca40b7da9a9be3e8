//! Surfaces job-level failures as high-priority alerts.

use std::sync::Arc;

use acadbatch_batch::{ExecutionContext, JobExecution, JobListener, JobStatus};
use acadbatch_events::{Alert, AlertSink};

pub struct JobFailureAlertListener {
    sink: Arc<dyn AlertSink>,
}

impl JobFailureAlertListener {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self { sink }
    }
}

/// "job X failed: step Y, reason Z"
pub fn failure_message(execution: &JobExecution) -> String {
    match &execution.failure {
        Some(f) => format!(
            "job {} failed: step {}, reason {}",
            execution.job_name, f.step_name, f.reason
        ),
        None => format!("job {} failed", execution.job_name),
    }
}

impl JobListener for JobFailureAlertListener {
    fn after_job(&self, execution: &JobExecution, _context: &ExecutionContext) {
        if execution.status == JobStatus::Failed {
            self.sink.raise(Alert::high(execution.job_name.clone(), failure_message(execution)));
        }
    }
}

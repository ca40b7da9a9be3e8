//! Job Orchestrator: sequences steps, persists execution records, fires listeners.
//!
//! ```text
//! STARTED → step 1 → step 2 → … → COMPLETED
//!        ↘ first unrecoverable step failure → FAILED (later steps never run)
//! ```
//!
//! Steps of one execution run strictly sequentially on the calling thread.
//! Different executions (different jobs, or the same job with distinct run
//! keys) may run concurrently: each owns its execution context and writes
//! only its own history row.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use acadbatch_core::{ErrorKind, RunKey};

use crate::context::ExecutionContext;
use crate::execution::{JobExecution, JobFailure, JobStatus, StepError, StepExecution};
use crate::history::{ExecutionHistory, HistoryError};
use crate::job::Job;
use crate::listener::JobListener;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("no job registered under '{0}'")]
    UnknownJob(String),
    #[error("job '{0}' is already registered")]
    DuplicateJob(String),
    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Runs registered jobs.
pub struct JobOrchestrator<H: ExecutionHistory> {
    jobs: HashMap<String, Arc<Job>>,
    history: H,
    listeners: Vec<Arc<dyn JobListener>>,
}

impl<H: ExecutionHistory> JobOrchestrator<H> {
    pub fn new(history: H) -> Self {
        Self {
            jobs: HashMap::new(),
            history,
            listeners: Vec::new(),
        }
    }

    /// Register a job definition under its name.
    pub fn register(&mut self, job: Job) -> Result<(), OrchestratorError> {
        if self.jobs.contains_key(job.name()) {
            return Err(OrchestratorError::DuplicateJob(job.name().to_string()));
        }
        self.jobs.insert(job.name().to_string(), Arc::new(job));
        Ok(())
    }

    pub fn add_listener(&mut self, listener: Arc<dyn JobListener>) {
        self.listeners.push(listener);
    }

    pub fn with_listener(mut self, listener: Arc<dyn JobListener>) -> Self {
        self.add_listener(listener);
        self
    }

    pub fn job_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.jobs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    /// Run `job_name` once under `run_key`.
    ///
    /// A failing step is not an `Err`: the returned execution carries status
    /// FAILED and the failure detail. `Err` means the execution could not be
    /// started at all (unknown job, duplicate run key, history unavailable).
    pub fn run(&self, job_name: &str, run_key: RunKey) -> Result<JobExecution, OrchestratorError> {
        let job = self
            .jobs
            .get(job_name)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownJob(job_name.to_string()))?;

        let mut execution = JobExecution::start(job.name(), run_key.clone());
        self.history.begin(&execution)?;
        for listener in &self.listeners {
            listener.before_job(&execution);
        }

        let mut context = ExecutionContext::new(job.name(), run_key);

        for step in job.steps() {
            for listener in &self.listeners {
                listener.before_step(&execution, step.name());
            }

            let mut step_execution = StepExecution::start(step.name());
            let outcome = catch_unwind(AssertUnwindSafe(|| step.execute(&mut step_execution, &mut context)))
                .unwrap_or_else(|panic| Err(panic_error(panic)));

            let failure = match outcome {
                Ok(()) => {
                    step_execution.mark_completed();
                    None
                }
                Err(err) => {
                    let failure = JobFailure {
                        step_name: step.name().to_string(),
                        reason: err.to_string(),
                    };
                    step_execution.mark_failed(err);
                    Some(failure)
                }
            };

            for listener in &self.listeners {
                listener.after_step(&execution, &step_execution);
            }
            execution.step_executions.push(step_execution);

            if let Some(failure) = failure {
                execution.mark_failed(failure);
                break;
            }
            self.persist(&execution);
        }

        if execution.status == JobStatus::Started {
            execution.mark_completed();
        }
        self.persist(&execution);

        for listener in &self.listeners {
            listener.after_job(&execution, &context);
        }
        debug!(job = %execution.job_name, context_entries = context.len(), "execution context discarded");

        Ok(execution)
    }

    fn persist(&self, execution: &JobExecution) {
        if let Err(e) = self.history.record(execution) {
            warn!(job = %execution.job_name, run_key = %execution.run_key, error = %e, "failed to record execution history");
        }
    }
}

fn panic_error(panic: Box<dyn std::any::Any + Send>) -> StepError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "step panicked".to_string());
    StepError {
        kind: ErrorKind::Unclassified,
        message: format!("step panicked: {message}"),
        cause: None,
    }
}

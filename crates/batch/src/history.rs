//! Durable record of job and step executions.
//!
//! Append-only from the engine's point of view: each execution writes only
//! its own row, so concurrent executions never contend on each other's data.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use acadbatch_core::{ErrorKind, ExecutionId, RunKey};

use crate::execution::JobExecution;

/// Execution history store abstraction.
pub trait ExecutionHistory: Send + Sync {
    /// Register a new execution. A second execution with the same
    /// (job name, run key) is rejected.
    fn begin(&self, execution: &JobExecution) -> Result<(), HistoryError>;

    /// Store the current state of an already registered execution.
    fn record(&self, execution: &JobExecution) -> Result<(), HistoryError>;

    /// Most recent executions of a job, newest first.
    fn query(&self, job_name: &str, limit: usize) -> Result<Vec<JobExecution>, HistoryError>;
}

/// History store error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("execution of '{job}' with run key '{run_key}' already exists")]
    DuplicateRunKey { job: String, run_key: RunKey },
    #[error("execution not found: {0}")]
    NotFound(ExecutionId),
    #[error("history storage error ({kind}): {message}")]
    Storage { kind: ErrorKind, message: String },
}

impl HistoryError {
    pub fn storage(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Storage {
            kind,
            message: message.into(),
        }
    }
}

impl<H> ExecutionHistory for Arc<H>
where
    H: ExecutionHistory + ?Sized,
{
    fn begin(&self, execution: &JobExecution) -> Result<(), HistoryError> {
        (**self).begin(execution)
    }

    fn record(&self, execution: &JobExecution) -> Result<(), HistoryError> {
        (**self).record(execution)
    }

    fn query(&self, job_name: &str, limit: usize) -> Result<Vec<JobExecution>, HistoryError> {
        (**self).query(job_name, limit)
    }
}

/// In-memory history for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryExecutionHistory {
    executions: RwLock<HashMap<ExecutionId, JobExecution>>,
    run_keys: RwLock<HashMap<(String, RunKey), ExecutionId>>,
}

impl InMemoryExecutionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn poisoned() -> HistoryError {
        HistoryError::storage(ErrorKind::Unclassified, "history lock poisoned")
    }
}

impl ExecutionHistory for InMemoryExecutionHistory {
    fn begin(&self, execution: &JobExecution) -> Result<(), HistoryError> {
        let mut keys = self.run_keys.write().map_err(|_| Self::poisoned())?;
        let key = (execution.job_name.clone(), execution.run_key.clone());
        if keys.contains_key(&key) {
            return Err(HistoryError::DuplicateRunKey {
                job: execution.job_name.clone(),
                run_key: execution.run_key.clone(),
            });
        }
        keys.insert(key, execution.id);
        drop(keys);

        let mut executions = self.executions.write().map_err(|_| Self::poisoned())?;
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    fn record(&self, execution: &JobExecution) -> Result<(), HistoryError> {
        let mut executions = self.executions.write().map_err(|_| Self::poisoned())?;
        match executions.get_mut(&execution.id) {
            Some(existing) => {
                *existing = execution.clone();
                Ok(())
            }
            None => Err(HistoryError::NotFound(execution.id)),
        }
    }

    fn query(&self, job_name: &str, limit: usize) -> Result<Vec<JobExecution>, HistoryError> {
        let executions = self.executions.read().map_err(|_| Self::poisoned())?;
        let mut result: Vec<_> = executions
            .values()
            .filter(|e| e.job_name == job_name)
            .cloned()
            .collect();

        result.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        result.truncate(limit);
        Ok(result)
    }
}

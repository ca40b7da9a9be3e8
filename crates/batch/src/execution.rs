//! Job and step execution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use acadbatch_core::{ErrorKind, ExecutionId, RunKey};

use crate::policy::FailureCause;

/// Job execution status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Started,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Started => "STARTED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step execution status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Started,
    Completed,
    Failed,
}

/// Why a step failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
    pub cause: Option<FailureCause>,
}

impl core::fmt::Display for StepError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.cause {
            Some(cause) => write!(f, "{} ({}): {}", cause, self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// Counters a step accumulates while it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCounters {
    pub read_count: u64,
    /// Items the processor rejected (not skips).
    pub filter_count: u64,
    pub write_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
    pub retry_count: u64,
    pub read_skip_count: u64,
    pub process_skip_count: u64,
    pub write_skip_count: u64,
}

impl StepCounters {
    pub fn skip_count(&self) -> u64 {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }
}

/// One step's run within a job execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_name: String,
    pub status: StepStatus,
    pub counters: StepCounters,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<StepError>,
}

impl StepExecution {
    pub fn start(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            status: StepStatus::Started,
            counters: StepCounters::default(),
            started_at: Utc::now(),
            ended_at: None,
            error: None,
        }
    }

    pub fn read_count(&self) -> u64 {
        self.counters.read_count
    }

    pub fn write_count(&self) -> u64 {
        self.counters.write_count
    }

    pub fn skip_count(&self) -> u64 {
        self.counters.skip_count()
    }

    pub fn mark_completed(&mut self) {
        self.status = StepStatus::Completed;
        self.ended_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: StepError) {
        self.status = StepStatus::Failed;
        self.error = Some(error);
        self.ended_at = Some(Utc::now());
    }

    pub fn summary(&self) -> StepSummary {
        StepSummary {
            step_name: self.step_name.clone(),
            read: self.counters.read_count,
            filtered: self.counters.filter_count,
            written: self.counters.write_count,
            skipped: self.counters.skip_count(),
            commits: self.counters.commit_count,
        }
    }
}

/// Compact per-step counts published into the execution context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSummary {
    pub step_name: String,
    pub read: u64,
    pub filtered: u64,
    pub written: u64,
    pub skipped: u64,
    pub commits: u64,
}

/// Terminal failure detail surfaced to listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub step_name: String,
    pub reason: String,
}

/// One run of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: ExecutionId,
    pub job_name: String,
    pub run_key: RunKey,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub step_executions: Vec<StepExecution>,
    pub failure: Option<JobFailure>,
}

impl JobExecution {
    pub fn start(job_name: impl Into<String>, run_key: RunKey) -> Self {
        Self {
            id: ExecutionId::new(),
            job_name: job_name.into(),
            run_key,
            status: JobStatus::Started,
            started_at: Utc::now(),
            ended_at: None,
            step_executions: Vec::new(),
            failure: None,
        }
    }

    pub fn step(&self, name: &str) -> Option<&StepExecution> {
        self.step_executions.iter().find(|s| s.step_name == name)
    }

    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.ended_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, failure: JobFailure) {
        self.status = JobStatus::Failed;
        self.failure = Some(failure);
        self.ended_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}

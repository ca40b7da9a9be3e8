//! `acadbatch-batch`: the batch execution engine.
//!
//! - [`job`]: immutable job definitions (ordered, named steps)
//! - [`chunk`]: read → process → write in fixed-size, transactional chunks
//! - [`tasklet`]: single atomic unit-of-work steps
//! - [`policy`]: retry, backoff and skip policies and the fault classifier
//! - [`orchestrator`]: runs jobs, persists executions, fires listeners
//! - [`history`]: execution history abstraction + in-memory implementation

pub mod chunk;
pub mod context;
pub mod execution;
pub mod history;
pub mod job;
pub mod listener;
pub mod orchestrator;
pub mod policy;
pub mod step;
pub mod tasklet;

pub use chunk::{ChunkStep, ItemProcessor, ItemReader, ItemStream, ItemWriter, PassThrough};
pub use context::{ContextKey, ExecutionContext};
pub use execution::{
    JobExecution, JobFailure, JobStatus, StepCounters, StepError, StepExecution, StepStatus,
    StepSummary,
};
pub use history::{ExecutionHistory, HistoryError, InMemoryExecutionHistory};
pub use job::{Job, JobBuilder, JobDefinitionError};
pub use listener::{JobListener, LoggingListener};
pub use orchestrator::{JobOrchestrator, OrchestratorError};
pub use policy::{
    BackoffPolicy, Classification, FailureCause, FaultDecision, FaultTolerance, RecordingSleeper,
    RetryPolicy, Sleeper, SkipPolicy, ThreadSleeper, UnclassifiedPolicy,
};
pub use step::{Step, summary_key};
pub use tasklet::{TaskStep, Tasklet};

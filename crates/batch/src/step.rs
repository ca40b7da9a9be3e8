//! Step abstraction shared by chunk and task steps.

use acadbatch_core::BatchError;

use crate::context::{ContextKey, ExecutionContext};
use crate::execution::{StepError, StepExecution, StepSummary};
use crate::policy::FailureCause;

/// A unit of a job. Steps of one execution run strictly in order.
///
/// `execute` updates the counters on `execution`; the orchestrator owns the
/// status transitions and records the returned error as the step failure.
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    fn execute(
        &self,
        execution: &mut StepExecution,
        context: &mut ExecutionContext,
    ) -> Result<(), StepError>;
}

/// Context key under which a finished step publishes its [`StepSummary`].
pub fn summary_key(step_name: &str) -> ContextKey<StepSummary> {
    ContextKey::new(format!("step.{step_name}.summary"))
}

impl StepError {
    pub fn with_cause(err: &BatchError, cause: FailureCause) -> Self {
        Self {
            kind: err.kind(),
            message: err.message().to_string(),
            cause: Some(cause),
        }
    }
}

impl From<BatchError> for StepError {
    fn from(err: BatchError) -> Self {
        Self {
            kind: err.kind(),
            message: err.message().to_string(),
            cause: None,
        }
    }
}

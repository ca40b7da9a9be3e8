//! Task Step Runner: a step executed as one atomic unit of work.

use tracing::info;

use acadbatch_core::BatchError;

use crate::context::ExecutionContext;
use crate::execution::{StepCounters, StepError, StepExecution};
use crate::step::{Step, summary_key};

/// Body of a task step. Counters are optional bookkeeping for reports.
pub trait Tasklet: Send + Sync {
    fn execute(&self, counters: &mut StepCounters, context: &mut ExecutionContext) -> Result<(), BatchError>;
}

impl<F> Tasklet for F
where
    F: Fn(&mut StepCounters, &mut ExecutionContext) -> Result<(), BatchError> + Send + Sync,
{
    fn execute(&self, counters: &mut StepCounters, context: &mut ExecutionContext) -> Result<(), BatchError> {
        self(counters, context)
    }
}

/// Wraps a [`Tasklet`] as a named [`Step`]. An error fails the step; there is
/// no chunk-level retry or skip here.
pub struct TaskStep<T> {
    name: String,
    tasklet: T,
}

impl<T: Tasklet> TaskStep<T> {
    pub fn new(name: impl Into<String>, tasklet: T) -> Self {
        Self {
            name: name.into(),
            tasklet,
        }
    }

    pub fn tasklet(&self) -> &T {
        &self.tasklet
    }
}

impl<T: Tasklet> Step for TaskStep<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        execution: &mut StepExecution,
        context: &mut ExecutionContext,
    ) -> Result<(), StepError> {
        self.tasklet.execute(&mut execution.counters, context)?;
        info!(
            step = %self.name,
            read = execution.counters.read_count,
            written = execution.counters.write_count,
            "task step finished"
        );
        context.put(&summary_key(&self.name), &execution.summary())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acadbatch_core::RunKey;

    use crate::context::ContextKey;

    #[test]
    fn closure_tasklet_updates_counters_and_context() {
        let key = ContextKey::<u64>::new("seen");
        let step = TaskStep::new("count", |counters: &mut StepCounters, ctx: &mut ExecutionContext| {
            counters.read_count = 7;
            ctx.put(&ContextKey::<u64>::new("seen"), &7)
        });
        let mut exec = StepExecution::start("count");
        let mut ctx = ExecutionContext::new("job", RunKey::new("r"));

        step.execute(&mut exec, &mut ctx).unwrap();

        assert_eq!(exec.read_count(), 7);
        assert_eq!(ctx.get(&key).unwrap(), Some(7));
        assert!(ctx.contains(&summary_key("count")));
    }

    #[test]
    fn tasklet_error_becomes_step_error() {
        let step = TaskStep::new("boom", |_: &mut StepCounters, _: &mut ExecutionContext| -> Result<(), BatchError> {
            Err(BatchError::bus_unavailable("broker down"))
        });
        let mut exec = StepExecution::start("boom");
        let mut ctx = ExecutionContext::new("job", RunKey::new("r"));

        let err = step.execute(&mut exec, &mut ctx).unwrap_err();
        assert_eq!(err.kind, acadbatch_core::ErrorKind::MessageBusUnavailable);
        assert_eq!(err.cause, None);
    }
}

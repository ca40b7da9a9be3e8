//! End-to-end: a chunk step and a report step wired into one job.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use acadbatch_batch::{
    BackoffPolicy, ChunkStep, ExecutionContext, FaultTolerance, InMemoryExecutionHistory,
    ItemProcessor, ItemReader, ItemStream, ItemWriter, Job, JobOrchestrator, JobStatus,
    RecordingSleeper, RetryPolicy, SkipPolicy, StepCounters, TaskStep, summary_key,
};
use acadbatch_core::{BatchError, RunKey};

/// Source rows; `None` models a row the processor cannot interpret.
struct Rows(Vec<Option<u32>>);

impl ItemReader for Rows {
    type Item = Option<u32>;

    fn open(&self, _context: &ExecutionContext) -> Result<ItemStream<'_, Option<u32>>, BatchError> {
        Ok(Box::new(self.0.iter().copied().map(Ok)))
    }
}

struct Double;

impl ItemProcessor for Double {
    type Input = Option<u32>;
    type Output = u32;

    fn process(&self, item: &Option<u32>) -> Result<Option<u32>, BatchError> {
        item.map(|v| Some(v * 2))
            .ok_or_else(|| BatchError::missing_field("value"))
    }
}

/// Fails the first `flaky` writes with a deadlock, then commits.
struct Sink {
    flaky: Mutex<u32>,
    rows: Arc<Mutex<Vec<u32>>>,
}

impl ItemWriter for Sink {
    type Item = u32;

    fn write(&self, items: &[u32]) -> Result<(), BatchError> {
        let mut flaky = self.flaky.lock().unwrap();
        if *flaky > 0 {
            *flaky -= 1;
            return Err(BatchError::deadlock("deadlock detected"));
        }
        self.rows.lock().unwrap().extend_from_slice(items);
        Ok(())
    }
}

#[test]
fn chunk_step_survives_deadlock_and_bad_rows_then_reports() {
    let rows = Arc::new(Mutex::new(Vec::new()));
    let sleeper = Arc::new(RecordingSleeper::new());
    let tolerance = FaultTolerance::new(
        RetryPolicy::with_max_attempts(5),
        BackoffPolicy::new(Duration::from_secs(1), 2.0, Duration::from_secs(16)),
        SkipPolicy::with_limit(5),
    );
    let load = ChunkStep::new(
        "load",
        Rows(vec![Some(1), None, Some(2), Some(3), None, Some(4)]),
        Double,
        Sink {
            flaky: Mutex::new(2),
            rows: rows.clone(),
        },
        3,
    )
    .unwrap()
    .with_fault_tolerance(tolerance)
    .with_sleeper(sleeper.clone());

    let reported = Arc::new(Mutex::new(None));
    let reported_in_step = reported.clone();
    let report = TaskStep::new(
        "report",
        move |_: &mut StepCounters, ctx: &mut ExecutionContext| -> Result<(), BatchError> {
            *reported_in_step.lock().unwrap() = ctx.get(&summary_key("load"))?;
            Ok(())
        },
    );

    let job = Job::builder("load-job").step(load).step(report).build().unwrap();
    let mut orchestrator = JobOrchestrator::new(InMemoryExecutionHistory::arc());
    orchestrator.register(job).unwrap();

    let exec = orchestrator.run("load-job", RunKey::new("r1")).unwrap();

    assert_eq!(exec.status, JobStatus::Completed);
    assert_eq!(*rows.lock().unwrap(), vec![2, 4, 6, 8]);
    assert_eq!(sleeper.delays(), vec![Duration::from_secs(1), Duration::from_secs(2)]);

    let load_exec = exec.step("load").unwrap();
    assert_eq!(load_exec.read_count(), 6);
    assert_eq!(load_exec.counters.process_skip_count, 2);
    assert_eq!(load_exec.write_count(), 4);

    let summary = reported.lock().unwrap().clone().unwrap();
    assert_eq!(summary.written, 4);
    assert_eq!(summary.skipped, 2);
}

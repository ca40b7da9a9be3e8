//! Chunk Processing Engine.
//!
//! Drives one bounded-dataset step:
//!
//! ```text
//! reader (forward-only cursor) → processor (pure, may reject) → chunk of N → writer (one transaction)
//! ```
//!
//! Fault handling per unit of work:
//! - **read**: the cursor has already moved past a failed record, so it cannot be re-read.
//!   Any non-fatal read error charges the skip budget; an exhausted budget fails the step
//! - **process**: the transform is re-run after backoff; otherwise skip or fail
//! - **write**: the *entire chunk* is retried after backoff. When retries are exhausted or the
//!   error is skippable, only the offending item is dropped and the rest is rewritten. If the
//!   writer cannot say which item failed, the chunk is rewritten one item per transaction to
//!   isolate it.
//!
//! A failed step is re-run from the top on the next schedule; writers must therefore use
//! idempotent predicates ("update rows still in status X").

use std::sync::Arc;

use tracing::{debug, info, warn};

use acadbatch_core::BatchError;

use crate::context::ExecutionContext;
use crate::execution::{StepCounters, StepError, StepExecution};
use crate::policy::{FaultDecision, FaultTolerance, Sleeper, ThreadSleeper};
use crate::step::{Step, summary_key};

/// Lazy, finite, forward-only sequence of input records.
pub type ItemStream<'a, T> = Box<dyn Iterator<Item = Result<T, BatchError>> + 'a>;

/// Opens a fresh cursor over the step's candidate query for every run.
pub trait ItemReader: Send + Sync {
    type Item;

    fn open(&self, context: &ExecutionContext) -> Result<ItemStream<'_, Self::Item>, BatchError>;
}

/// Pure transform. `Ok(None)` rejects the record: it is excluded from the
/// chunk and counted as filtered, not skipped.
pub trait ItemProcessor: Send + Sync {
    type Input;
    type Output;

    fn process(&self, item: &Self::Input) -> Result<Option<Self::Output>, BatchError>;
}

/// Writes one chunk against the step's single target store.
///
/// Each call must be atomic: on `Err` nothing from the call may remain
/// committed. Writers that know which item broke the write should tag the
/// error with [`BatchError::at_item`].
pub trait ItemWriter: Send + Sync {
    type Item;

    fn write(&self, items: &[Self::Item]) -> Result<(), BatchError>;
}

/// Identity processor.
#[derive(Debug)]
pub struct PassThrough<T>(std::marker::PhantomData<fn() -> T>);

impl<T> PassThrough<T> {
    pub fn new() -> Self {
        Self(std::marker::PhantomData)
    }
}

impl<T> Default for PassThrough<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> ItemProcessor for PassThrough<T> {
    type Input = T;
    type Output = T;

    fn process(&self, item: &T) -> Result<Option<T>, BatchError> {
        Ok(Some(item.clone()))
    }
}

/// A step that reads, transforms and writes records in fixed-size chunks.
pub struct ChunkStep<R, P, W> {
    name: String,
    reader: R,
    processor: P,
    writer: W,
    chunk_size: usize,
    tolerance: FaultTolerance,
    sleeper: Arc<dyn Sleeper>,
}

impl<R, P, W> ChunkStep<R, P, W>
where
    R: ItemReader,
    P: ItemProcessor<Input = R::Item>,
    W: ItemWriter<Item = P::Output>,
{
    /// Create a chunk step. A zero chunk size is a configuration error.
    pub fn new(
        name: impl Into<String>,
        reader: R,
        processor: P,
        writer: W,
        chunk_size: usize,
    ) -> Result<Self, BatchError> {
        let name = name.into();
        if chunk_size == 0 {
            return Err(BatchError::configuration(format!(
                "chunk step '{name}': chunk size must be at least 1"
            )));
        }
        Ok(Self {
            name,
            reader,
            processor,
            writer,
            chunk_size,
            tolerance: FaultTolerance::default(),
            sleeper: Arc::new(ThreadSleeper),
        })
    }

    pub fn with_fault_tolerance(mut self, tolerance: FaultTolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn open_reader(
        &self,
        context: &ExecutionContext,
        counters: &mut StepCounters,
    ) -> Result<ItemStream<'_, R::Item>, StepError> {
        let mut retries = 0;
        loop {
            match self.reader.open(context) {
                Ok(stream) => return Ok(stream),
                Err(e) => match self.tolerance.decide(&e, retries, counters.skip_count()) {
                    FaultDecision::Retry { attempt, delay } => {
                        warn!(step = %self.name, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying reader open");
                        counters.retry_count += 1;
                        self.sleeper.sleep(delay);
                        retries = attempt;
                    }
                    // Nothing to skip before the cursor exists.
                    FaultDecision::Skip => return Err(StepError::from(e)),
                    FaultDecision::Fail(cause) => return Err(StepError::with_cause(&e, cause)),
                },
            }
        }
    }

    fn read_next(
        &self,
        stream: &mut ItemStream<'_, R::Item>,
        counters: &mut StepCounters,
    ) -> Result<Option<R::Item>, StepError> {
        loop {
            match stream.next() {
                None => return Ok(None),
                Some(Ok(item)) => return Ok(Some(item)),
                Some(Err(e)) => match self.tolerance.decide_unrepeatable(&e, counters.skip_count()) {
                    FaultDecision::Fail(cause) => return Err(StepError::with_cause(&e, cause)),
                    FaultDecision::Skip | FaultDecision::Retry { .. } => {
                        counters.read_skip_count += 1;
                        warn!(step = %self.name, kind = %e.kind(), skips = counters.skip_count(), error = %e, "skipping unreadable record");
                    }
                },
            }
        }
    }

    fn process(
        &self,
        item: &R::Item,
        counters: &mut StepCounters,
    ) -> Result<Option<P::Output>, StepError> {
        let mut retries = 0;
        loop {
            match self.processor.process(item) {
                Ok(Some(out)) => return Ok(Some(out)),
                Ok(None) => {
                    counters.filter_count += 1;
                    return Ok(None);
                }
                Err(e) => match self.tolerance.decide(&e, retries, counters.skip_count()) {
                    FaultDecision::Retry { attempt, delay } => {
                        warn!(step = %self.name, attempt, error = %e, "retrying processor");
                        counters.retry_count += 1;
                        self.sleeper.sleep(delay);
                        retries = attempt;
                    }
                    FaultDecision::Skip => {
                        counters.process_skip_count += 1;
                        warn!(step = %self.name, kind = %e.kind(), skips = counters.skip_count(), error = %e, "skipping record rejected by processor");
                        return Ok(None);
                    }
                    FaultDecision::Fail(cause) => return Err(StepError::with_cause(&e, cause)),
                },
            }
        }
    }

    fn write_chunk(&self, mut items: Vec<P::Output>, counters: &mut StepCounters) -> Result<(), StepError> {
        let mut retries = 0;
        while !items.is_empty() {
            let err = match self.writer.write(&items) {
                Ok(()) => {
                    counters.commit_count += 1;
                    counters.write_count += items.len() as u64;
                    debug!(step = %self.name, items = items.len(), "chunk committed");
                    return Ok(());
                }
                Err(e) => e,
            };

            counters.rollback_count += 1;
            match self.tolerance.decide(&err, retries, counters.skip_count()) {
                FaultDecision::Retry { attempt, delay } => {
                    warn!(step = %self.name, attempt, delay_ms = delay.as_millis() as u64, error = %err, "chunk write failed; retrying whole chunk");
                    counters.retry_count += 1;
                    self.sleeper.sleep(delay);
                    retries = attempt;
                }
                FaultDecision::Skip => {
                    let offending = err
                        .item_index()
                        .filter(|i| *i < items.len())
                        .or((items.len() == 1).then_some(0));
                    match offending {
                        Some(index) => {
                            items.remove(index);
                            counters.write_skip_count += 1;
                            retries = 0;
                            warn!(step = %self.name, kind = %err.kind(), skips = counters.skip_count(), error = %err, "skipping item that failed to write");
                        }
                        None => return self.scan(items, counters),
                    }
                }
                FaultDecision::Fail(cause) => return Err(StepError::with_cause(&err, cause)),
            }
        }
        Ok(())
    }

    /// Rewrite a chunk one item per transaction to isolate the failing item(s).
    fn scan(&self, items: Vec<P::Output>, counters: &mut StepCounters) -> Result<(), StepError> {
        debug!(step = %self.name, items = items.len(), "scanning chunk item by item");
        for item in items {
            self.write_chunk(vec![item], counters)?;
        }
        Ok(())
    }
}

impl<R, P, W> Step for ChunkStep<R, P, W>
where
    R: ItemReader,
    P: ItemProcessor<Input = R::Item>,
    W: ItemWriter<Item = P::Output>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        execution: &mut StepExecution,
        context: &mut ExecutionContext,
    ) -> Result<(), StepError> {
        let counters = &mut execution.counters;
        let mut stream = self.open_reader(context, counters)?;

        let mut exhausted = false;
        while !exhausted {
            let mut chunk = Vec::with_capacity(self.chunk_size);
            while chunk.len() < self.chunk_size {
                let Some(item) = self.read_next(&mut stream, counters)? else {
                    exhausted = true;
                    break;
                };
                counters.read_count += 1;
                if let Some(out) = self.process(&item, counters)? {
                    chunk.push(out);
                }
            }
            if !chunk.is_empty() {
                self.write_chunk(chunk, counters)?;
            }
        }
        drop(stream);

        info!(
            step = %self.name,
            read = counters.read_count,
            written = counters.write_count,
            filtered = counters.filter_count,
            skipped = counters.skip_count(),
            commits = counters.commit_count,
            "chunk step finished"
        );

        context.put(&summary_key(&self.name), &execution.summary())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use acadbatch_core::RunKey;
    use proptest::prelude::*;

    use crate::policy::{BackoffPolicy, RecordingSleeper, RetryPolicy, SkipPolicy};

    struct VecReader(Vec<Result<u32, BatchError>>);

    impl ItemReader for VecReader {
        type Item = u32;

        fn open(&self, _context: &ExecutionContext) -> Result<ItemStream<'_, u32>, BatchError> {
            Ok(Box::new(self.0.iter().cloned()))
        }
    }

    /// Writer that commits into a vector and fails according to a script.
    #[derive(Default)]
    struct ScriptedWriter {
        committed: Mutex<Vec<Vec<u32>>>,
        failures: Mutex<Vec<BatchError>>,
        poison: Vec<u32>,
        /// Items whose first solo or chunk write fails transiently.
        transient_once: Mutex<Vec<u32>>,
    }

    impl ScriptedWriter {
        fn failing(failures: Vec<BatchError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                ..Default::default()
            }
        }

        fn poisoned(poison: Vec<u32>) -> Self {
            Self {
                poison,
                ..Default::default()
            }
        }

        fn commits(&self) -> Vec<Vec<u32>> {
            self.committed.lock().unwrap().clone()
        }
    }

    impl ItemWriter for &ScriptedWriter {
        type Item = u32;

        fn write(&self, items: &[u32]) -> Result<(), BatchError> {
            if let Some(err) = self.failures.lock().unwrap().pop() {
                return Err(err);
            }
            // Poisoned items fail without telling which one.
            if items.iter().any(|i| self.poison.contains(i)) {
                return Err(BatchError::malformed("constraint violated"));
            }
            {
                let mut flaky = self.transient_once.lock().unwrap();
                if let Some(pos) = flaky.iter().position(|f| items.contains(f)) {
                    flaky.remove(pos);
                    return Err(BatchError::transient("lock timeout"));
                }
            }
            self.committed.lock().unwrap().push(items.to_vec());
            Ok(())
        }
    }

    struct EvenOnly;

    impl ItemProcessor for EvenOnly {
        type Input = u32;
        type Output = u32;

        fn process(&self, item: &u32) -> Result<Option<u32>, BatchError> {
            Ok((item % 2 == 0).then_some(*item))
        }
    }

    fn ok_items(n: u32) -> Vec<Result<u32, BatchError>> {
        (0..n).map(Ok).collect()
    }

    fn run<P: ItemProcessor<Input = u32, Output = u32>>(
        step: &ChunkStep<VecReader, P, &ScriptedWriter>,
    ) -> (StepExecution, Result<(), StepError>, ExecutionContext) {
        let mut exec = StepExecution::start(step.name());
        let mut ctx = ExecutionContext::new("job", RunKey::new("r"));
        let result = step.execute(&mut exec, &mut ctx);
        (exec, result, ctx)
    }

    fn tolerance(max_retries: u32, skip_limit: u64) -> FaultTolerance {
        FaultTolerance::new(
            RetryPolicy::with_max_attempts(max_retries),
            BackoffPolicy::new(Duration::from_secs(1), 2.0, Duration::from_secs(16)),
            SkipPolicy::with_limit(skip_limit),
        )
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let writer = ScriptedWriter::default();
        let err = ChunkStep::new("s", VecReader(vec![]), PassThrough::new(), &writer, 0)
            .err()
            .unwrap();
        assert_eq!(err.kind(), acadbatch_core::ErrorKind::Configuration);
    }

    #[test]
    fn rejected_records_are_filtered_not_skipped() {
        let writer = ScriptedWriter::default();
        let step = ChunkStep::new("s", VecReader(ok_items(10)), EvenOnly, &writer, 2).unwrap();
        let (exec, result, ctx) = run(&step);

        assert!(result.is_ok());
        assert_eq!(exec.counters.read_count, 10);
        assert_eq!(exec.counters.filter_count, 5);
        assert_eq!(exec.skip_count(), 0);
        assert_eq!(writer.commits(), vec![vec![0, 2], vec![4, 6], vec![8]]);

        let summary = ctx.get(&summary_key("s")).unwrap().unwrap();
        assert_eq!(summary.written, 5);
        assert_eq!(summary.commits, 3);
    }

    #[test]
    fn retryable_write_error_retries_whole_chunk_with_backoff() {
        let writer = ScriptedWriter::failing(vec![
            BatchError::deadlock("d2"),
            BatchError::transient("t1"),
        ]);
        let sleeper = Arc::new(RecordingSleeper::new());
        let step = ChunkStep::new("s", VecReader(ok_items(3)), PassThrough::new(), &writer, 3)
            .unwrap()
            .with_fault_tolerance(tolerance(5, 0))
            .with_sleeper(sleeper.clone());
        let (exec, result, _) = run(&step);

        assert!(result.is_ok());
        assert_eq!(writer.commits(), vec![vec![0, 1, 2]]);
        assert_eq!(exec.counters.retry_count, 2);
        assert_eq!(exec.counters.rollback_count, 2);
        assert_eq!(exec.counters.commit_count, 1);
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[test]
    fn exhausted_retries_fail_the_step() {
        let writer = ScriptedWriter::failing(vec![BatchError::transient("down"); 4]);
        let sleeper = Arc::new(RecordingSleeper::new());
        let step = ChunkStep::new("s", VecReader(ok_items(2)), PassThrough::new(), &writer, 2)
            .unwrap()
            .with_fault_tolerance(tolerance(3, 10))
            .with_sleeper(sleeper.clone());
        let (exec, result, _) = run(&step);

        let err = result.unwrap_err();
        assert_eq!(err.cause, Some(crate::policy::FailureCause::RetriesExhausted));
        assert!(writer.commits().is_empty());
        assert_eq!(exec.counters.write_count, 0);
        assert_eq!(sleeper.delays().len(), 3);
    }

    #[test]
    fn indexed_skippable_error_drops_only_that_item() {
        let writer = ScriptedWriter::failing(vec![BatchError::malformed("bad").at_item(1)]);
        let step = ChunkStep::new("s", VecReader(ok_items(3)), PassThrough::new(), &writer, 3)
            .unwrap()
            .with_fault_tolerance(tolerance(0, 5));
        let (exec, result, _) = run(&step);

        assert!(result.is_ok());
        assert_eq!(writer.commits(), vec![vec![0, 2]]);
        assert_eq!(exec.counters.write_skip_count, 1);
        assert_eq!(exec.write_count(), 2);
    }

    #[test]
    fn unindexed_skippable_error_scans_chunk_item_by_item() {
        let writer = ScriptedWriter::poisoned(vec![3]);
        let step = ChunkStep::new("s", VecReader(ok_items(5)), PassThrough::new(), &writer, 5)
            .unwrap()
            .with_fault_tolerance(tolerance(0, 5));
        let (exec, result, _) = run(&step);

        assert!(result.is_ok());
        assert_eq!(writer.commits(), vec![vec![0], vec![1], vec![2], vec![4]]);
        assert_eq!(exec.counters.write_skip_count, 1);
        assert_eq!(exec.write_count(), 4);
    }

    #[test]
    fn skip_limit_five_tolerates_five_bad_records() {
        let mut items = ok_items(10);
        for i in [1, 3, 5, 7, 9] {
            items[i] = Err(BatchError::malformed(format!("row {i}")));
        }
        let writer = ScriptedWriter::default();
        let step = ChunkStep::new("s", VecReader(items), PassThrough::new(), &writer, 4)
            .unwrap()
            .with_fault_tolerance(tolerance(0, 5));
        let (exec, result, _) = run(&step);

        assert!(result.is_ok());
        assert_eq!(exec.skip_count(), 5);
        assert_eq!(exec.write_count(), 5);
    }

    #[test]
    fn sixth_skippable_error_fails_the_step() {
        let mut items = ok_items(12);
        for i in [0, 2, 4, 6, 8, 10] {
            items[i] = Err(BatchError::missing_field(format!("row {i}")));
        }
        let writer = ScriptedWriter::default();
        let step = ChunkStep::new("s", VecReader(items), PassThrough::new(), &writer, 100)
            .unwrap()
            .with_fault_tolerance(tolerance(0, 5));
        let (exec, result, _) = run(&step);

        let err = result.unwrap_err();
        assert_eq!(err.cause, Some(crate::policy::FailureCause::SkipLimitExceeded));
        assert_eq!(exec.skip_count(), 5);
        assert!(writer.commits().is_empty());
    }

    #[test]
    fn fatal_read_error_aborts_immediately() {
        let items = vec![Ok(1), Err(BatchError::configuration("unknown column")), Ok(2)];
        let writer = ScriptedWriter::default();
        let step = ChunkStep::new("s", VecReader(items), PassThrough::new(), &writer, 1)
            .unwrap()
            .with_fault_tolerance(tolerance(3, 100));
        let (exec, result, _) = run(&step);

        assert_eq!(result.unwrap_err().cause, Some(crate::policy::FailureCause::Fatal));
        assert_eq!(writer.commits(), vec![vec![1]]);
        assert_eq!(exec.read_count(), 1);
    }

    #[test]
    fn transient_read_error_without_skip_budget_fails_the_step() {
        let items = vec![Ok(1), Err(BatchError::transient("blip")), Ok(2)];
        let writer = ScriptedWriter::default();
        let sleeper = Arc::new(RecordingSleeper::new());
        let step = ChunkStep::new("s", VecReader(items), PassThrough::new(), &writer, 10)
            .unwrap()
            .with_fault_tolerance(tolerance(2, 0))
            .with_sleeper(sleeper.clone());
        let (exec, result, _) = run(&step);

        assert_eq!(
            result.unwrap_err().cause,
            Some(crate::policy::FailureCause::SkipLimitExceeded)
        );
        assert!(writer.commits().is_empty());
        assert_eq!(exec.read_count(), 1);
        assert_eq!(exec.skip_count(), 0);
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn transient_read_error_is_charged_as_a_skip() {
        let items = vec![Ok(1), Err(BatchError::transient("blip")), Ok(2)];
        let source_records = items.len() as u64;
        let writer = ScriptedWriter::default();
        let sleeper = Arc::new(RecordingSleeper::new());
        let step = ChunkStep::new("s", VecReader(items), PassThrough::new(), &writer, 10)
            .unwrap()
            .with_fault_tolerance(tolerance(2, 1))
            .with_sleeper(sleeper.clone());
        let (exec, result, _) = run(&step);

        assert!(result.is_ok());
        assert_eq!(writer.commits(), vec![vec![1, 2]]);
        assert_eq!(exec.counters.read_skip_count, 1);
        assert_eq!(exec.counters.retry_count, 0);
        assert_eq!(exec.read_count() + exec.skip_count(), source_records);
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn scan_retries_one_item_and_skips_another() {
        let writer = ScriptedWriter {
            poison: vec![3],
            transient_once: Mutex::new(vec![1]),
            ..Default::default()
        };
        let sleeper = Arc::new(RecordingSleeper::new());
        let step = ChunkStep::new("s", VecReader(ok_items(5)), PassThrough::new(), &writer, 5)
            .unwrap()
            .with_fault_tolerance(tolerance(2, 5))
            .with_sleeper(sleeper.clone());
        let (exec, result, _) = run(&step);

        assert!(result.is_ok());
        assert_eq!(writer.commits(), vec![vec![0], vec![1], vec![2], vec![4]]);
        assert_eq!(exec.counters.retry_count, 1);
        assert_eq!(exec.counters.write_skip_count, 1);
        assert_eq!(exec.skip_count(), 1);
        assert_eq!(exec.counters.rollback_count, 3);
        assert_eq!(exec.counters.commit_count, 4);
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(1)]);
    }

    #[test]
    fn read_and_write_skips_share_one_budget() {
        let mut items = ok_items(6);
        items[2] = Err(BatchError::malformed("row 2"));
        let writer = ScriptedWriter::poisoned(vec![4]);
        let step = ChunkStep::new("s", VecReader(items), PassThrough::new(), &writer, 10)
            .unwrap()
            .with_fault_tolerance(tolerance(0, 2));
        let (exec, result, _) = run(&step);

        assert!(result.is_ok());
        assert_eq!(writer.commits(), vec![vec![0], vec![1], vec![3], vec![5]]);
        assert_eq!(exec.counters.read_skip_count, 1);
        assert_eq!(exec.counters.write_skip_count, 1);
        assert_eq!(exec.skip_count(), 2);
        assert_eq!(exec.counters.retry_count, 0);
        assert_eq!(exec.read_count() + exec.counters.read_skip_count, 6);
    }

    #[test]
    fn read_skip_exhausts_budget_before_write_skip() {
        let mut items = ok_items(6);
        items[2] = Err(BatchError::malformed("row 2"));
        let writer = ScriptedWriter::poisoned(vec![4]);
        let step = ChunkStep::new("s", VecReader(items), PassThrough::new(), &writer, 10)
            .unwrap()
            .with_fault_tolerance(tolerance(0, 1));
        let (exec, result, _) = run(&step);

        assert_eq!(
            result.unwrap_err().cause,
            Some(crate::policy::FailureCause::SkipLimitExceeded)
        );
        assert!(writer.commits().is_empty());
        assert_eq!(exec.skip_count(), 1);
        assert_eq!(exec.counters.write_skip_count, 0);
        assert_eq!(exec.counters.retry_count, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: N records with chunk size C are written in exactly ⌈N/C⌉ commits.
        #[test]
        fn successful_step_commits_ceil_n_over_c(n in 0u32..300, c in 1usize..40) {
            let writer = ScriptedWriter::default();
            let step = ChunkStep::new("s", VecReader(ok_items(n)), PassThrough::new(), &writer, c).unwrap();
            let (exec, result, _) = run(&step);

            prop_assert!(result.is_ok());
            prop_assert_eq!(exec.write_count(), n as u64);
            prop_assert_eq!(exec.counters.commit_count, (n as u64).div_ceil(c as u64));
            prop_assert_eq!(writer.commits().concat(), (0..n).collect::<Vec<_>>());
        }
    }
}

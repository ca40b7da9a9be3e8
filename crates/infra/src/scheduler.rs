//! Thread-pool scheduler that triggers registered jobs periodically or on demand.
//!
//! A dispatcher thread owns the timetable and hands `(job, run key)` pairs to a
//! fixed pool of worker threads over a channel. Run keys derive from the
//! trigger timestamp; two triggers of the same job within one millisecond get
//! a numeric suffix so every trigger maps to a distinct execution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use acadbatch_batch::{ExecutionHistory, HistoryError, JobOrchestrator, JobStatus, OrchestratorError};
use acadbatch_core::RunKey;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown job: {0}")]
    UnknownJob(String),
    #[error("scheduler is stopped")]
    Stopped,
    #[error("failed to spawn scheduler thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Jobs that may run at the same time.
    pub workers: usize,
    /// Upper bound on how long the dispatcher sleeps between timetable checks.
    pub poll_interval: Duration,
    /// Thread name prefix.
    pub name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval: Duration::from_secs(1),
            name: "batch-scheduler".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub job_name: String,
    pub every: Duration,
}

/// Scheduler runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SchedulerStats {
    pub triggered: u64,
    pub completed: u64,
    pub failed: u64,
    /// Triggers refused by the history (duplicate run key).
    pub rejected: u64,
    pub running: usize,
}

#[derive(Debug)]
enum Command {
    Trigger(String),
    Shutdown,
}

type Stats = Arc<Mutex<SchedulerStats>>;

fn update(stats: &Stats, f: impl FnOnce(&mut SchedulerStats)) {
    let mut guard = stats.lock().unwrap_or_else(|p| p.into_inner());
    f(&mut guard);
}

/// Handle to control a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    join: Option<thread::JoinHandle<()>>,
    stats: Stats,
    jobs: Vec<String>,
}

impl SchedulerHandle {
    /// Queue an immediate run of `job_name`.
    pub fn trigger(&self, job_name: &str) -> Result<(), SchedulerError> {
        if !self.jobs.iter().any(|j| j == job_name) {
            return Err(SchedulerError::UnknownJob(job_name.to_string()));
        }
        self.commands
            .send(Command::Trigger(job_name.to_string()))
            .map_err(|_| SchedulerError::Stopped)
    }

    /// Stop scheduling, let queued and running jobs finish, then join.
    pub fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// Periodic and on-demand job trigger.
pub struct Scheduler<H: ExecutionHistory> {
    orchestrator: Arc<JobOrchestrator<H>>,
    schedules: Vec<Schedule>,
}

impl<H: ExecutionHistory + 'static> Scheduler<H> {
    pub fn new(orchestrator: Arc<JobOrchestrator<H>>) -> Self {
        Self {
            orchestrator,
            schedules: Vec::new(),
        }
    }

    /// Run `job_name` every `every`, first after one full interval.
    pub fn every(mut self, job_name: &str, every: Duration) -> Result<Self, SchedulerError> {
        if !self.orchestrator.job_names().contains(&job_name) {
            return Err(SchedulerError::UnknownJob(job_name.to_string()));
        }
        self.schedules.push(Schedule {
            job_name: job_name.to_string(),
            every,
        });
        Ok(self)
    }

    pub fn schedules(&self) -> &[Schedule] {
        &self.schedules
    }

    /// Start the dispatcher and worker threads.
    pub fn spawn(self, config: SchedulerConfig) -> Result<SchedulerHandle, SchedulerError> {
        let (command_tx, command_rx) = mpsc::channel::<Command>();
        let (work_tx, work_rx) = mpsc::channel::<(String, RunKey)>();
        let work_rx = Arc::new(Mutex::new(work_rx));
        let stats: Stats = Arc::new(Mutex::new(SchedulerStats::default()));

        let mut workers = Vec::with_capacity(config.workers);
        for i in 0..config.workers.max(1) {
            let orchestrator = self.orchestrator.clone();
            let rx = work_rx.clone();
            let stats = stats.clone();
            let worker = thread::Builder::new()
                .name(format!("{}-worker-{i}", config.name))
                .spawn(move || worker_loop(orchestrator, rx, stats))?;
            workers.push(worker);
        }

        let jobs = self
            .orchestrator
            .job_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let schedules = self.schedules;
        let dispatcher_stats = stats.clone();
        let name = config.name.clone();
        let join = thread::Builder::new().name(config.name.clone()).spawn(move || {
            info!(scheduler = %name, workers = workers.len(), schedules = schedules.len(), "scheduler started");
            dispatch_loop(
                schedules,
                command_rx,
                work_tx,
                dispatcher_stats,
                config.poll_interval,
            );
            for worker in workers {
                let _ = worker.join();
            }
            info!(scheduler = %name, "scheduler stopped");
        })?;

        Ok(SchedulerHandle {
            commands: command_tx,
            join: Some(join),
            stats,
            jobs,
        })
    }
}

#[derive(Default)]
struct RunKeys {
    last: HashMap<String, (String, u32)>,
}

impl RunKeys {
    fn next(&mut self, job_name: &str) -> RunKey {
        let base = RunKey::from_trigger(Utc::now()).as_str().to_string();
        let entry = self
            .last
            .entry(job_name.to_string())
            .or_insert_with(|| (String::new(), 0));
        if entry.0 == base {
            entry.1 += 1;
            RunKey::new(format!("{base}-{}", entry.1))
        } else {
            *entry = (base.clone(), 0);
            RunKey::new(base)
        }
    }
}

fn dispatch_loop(
    schedules: Vec<Schedule>,
    commands: mpsc::Receiver<Command>,
    work: mpsc::Sender<(String, RunKey)>,
    stats: Stats,
    poll_interval: Duration,
) {
    let start = Instant::now();
    let mut timetable: Vec<(Schedule, Instant)> = schedules
        .into_iter()
        .map(|s| {
            let due = start + s.every;
            (s, due)
        })
        .collect();
    let mut keys = RunKeys::default();

    let mut dispatch = |job_name: &str| {
        let run_key = keys.next(job_name);
        debug!(job = %job_name, run_key = %run_key, "dispatching job");
        if work.send((job_name.to_string(), run_key)).is_err() {
            warn!(job = %job_name, "no workers left, trigger dropped");
            return;
        }
        update(&stats, |s| s.triggered += 1);
    };

    loop {
        let now = Instant::now();
        let wait = timetable
            .iter()
            .map(|(_, due)| due.saturating_duration_since(now))
            .min()
            .unwrap_or(poll_interval)
            .min(poll_interval);

        match commands.recv_timeout(wait) {
            Ok(Command::Trigger(job_name)) => dispatch(&job_name),
            Ok(Command::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        for (schedule, due) in timetable.iter_mut() {
            if *due <= now {
                dispatch(&schedule.job_name);
                *due = now + schedule.every;
            }
        }
    }
}

fn worker_loop<H: ExecutionHistory>(
    orchestrator: Arc<JobOrchestrator<H>>,
    work: Arc<Mutex<mpsc::Receiver<(String, RunKey)>>>,
    stats: Stats,
) {
    loop {
        let next = {
            let rx = work.lock().unwrap_or_else(|p| p.into_inner());
            rx.recv()
        };
        let Ok((job_name, run_key)) = next else {
            break;
        };

        update(&stats, |s| s.running += 1);
        let outcome = orchestrator.run(&job_name, run_key.clone());
        update(&stats, |s| {
            s.running -= 1;
            match &outcome {
                Ok(execution) if execution.status == JobStatus::Completed => s.completed += 1,
                Ok(_) => s.failed += 1,
                Err(OrchestratorError::History(HistoryError::DuplicateRunKey { .. })) => {
                    s.rejected += 1
                }
                Err(_) => s.failed += 1,
            }
        });
        if let Err(e) = outcome {
            error!(job = %job_name, run_key = %run_key, error = %e, "scheduled run was not executed");
        }
    }
}

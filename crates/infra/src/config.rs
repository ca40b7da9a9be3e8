//! Service configuration.
//!
//! Resolution order: built-in defaults, then the TOML file named by
//! `ACADBATCH_CONFIG` (if set), then individual environment overrides.
//! The result is validated before anything is wired from it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use acadbatch_batch::{BackoffPolicy, RetryPolicy, UnclassifiedPolicy};
use acadbatch_reconcile::{
    CONSISTENCY_RECONCILIATION, ENROLLMENT_ARCHIVAL, JobSettings, NOTIFICATION_RETRY,
};

pub const CONFIG_PATH_VAR: &str = "ACADBATCH_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("environment variable {var} has invalid value '{value}'")]
    Env { var: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Retries after the first failure.
    pub max_attempts: u32,
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval_ms: 1_000,
            multiplier: 2.0,
            max_interval_ms: 16_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ArchivalSection {
    pub chunk_size: usize,
    pub skip_limit: u64,
    pub closed_retention_years: u32,
    pub notification_retention_days: u32,
}

impl Default for ArchivalSection {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            skip_limit: 10,
            closed_retention_years: 5,
            notification_retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconciliationSection {
    pub enrollment_duration_limit_years: u32,
    pub artifact_root: PathBuf,
    pub quarantine_dir: String,
    pub dry_run: bool,
}

impl Default for ReconciliationSection {
    fn default() -> Self {
        Self {
            enrollment_duration_limit_years: 6,
            artifact_root: PathBuf::from("uploads"),
            quarantine_dir: "quarantine".to_string(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SweeperSection {
    pub staleness_hours: u32,
}

impl Default for SweeperSection {
    fn default() -> Self {
        Self { staleness_hours: 24 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub workers: usize,
    /// Seconds between scheduled runs, per job name.
    pub intervals: BTreeMap<String, u64>,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        let intervals = [
            (ENROLLMENT_ARCHIVAL, 24 * 3_600),
            (CONSISTENCY_RECONCILIATION, 3_600),
            (NOTIFICATION_RETRY, 15 * 60),
        ]
        .into_iter()
        .map(|(job, secs)| (job.to_string(), secs))
        .collect();
        Self { workers: 2, intervals }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Enables Postgres execution history when set.
    pub database_url: Option<String>,
    pub unclassified_errors: UnclassifiedPolicy,
    pub retry: RetrySection,
    pub archival: ArchivalSection,
    pub reconciliation: ReconciliationSection,
    pub sweeper: SweeperSection,
    pub scheduler: SchedulerSection,
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}

impl BatchConfig {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|var| std::env::var(var).ok())
    }

    /// Load using `env` as the variable lookup.
    pub fn load_with(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match env(CONFIG_PATH_VAR).filter(|p| !p.is_empty()) {
            Some(path) => {
                let path = PathBuf::from(path);
                let contents = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Io { path, source })?;
                Self::from_toml_str(&contents)?
            }
            None => Self::default(),
        };
        config.apply_env(&env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = env("ACADBATCH_CHUNK_SIZE") {
            self.archival.chunk_size = parse_env("ACADBATCH_CHUNK_SIZE", v)?;
        }
        if let Some(v) = env("ACADBATCH_SKIP_LIMIT") {
            self.archival.skip_limit = parse_env("ACADBATCH_SKIP_LIMIT", v)?;
        }
        if let Some(v) = env("ACADBATCH_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_env("ACADBATCH_RETRY_MAX_ATTEMPTS", v)?;
        }
        if let Some(v) = env("ACADBATCH_STALENESS_HOURS") {
            self.sweeper.staleness_hours = parse_env("ACADBATCH_STALENESS_HOURS", v)?;
        }
        if let Some(v) = env("ACADBATCH_ARTIFACT_ROOT") {
            self.reconciliation.artifact_root = PathBuf::from(v);
        }
        if let Some(v) = env("DATABASE_URL")
            && !v.is_empty()
        {
            self.database_url = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.archival.chunk_size == 0 {
            return invalid("archival.chunk_size must be at least 1");
        }
        if !(self.retry.multiplier >= 1.0) {
            return invalid("retry.multiplier must be >= 1.0");
        }
        if self.retry.initial_interval_ms > self.retry.max_interval_ms {
            return invalid("retry.initial_interval_ms exceeds retry.max_interval_ms");
        }
        if self.scheduler.workers == 0 {
            return invalid("scheduler.workers must be at least 1");
        }
        if self.reconciliation.artifact_root.as_os_str().is_empty() {
            return invalid("reconciliation.artifact_root must not be empty");
        }
        if let Some((job, _)) = self.scheduler.intervals.iter().find(|(_, secs)| **secs == 0) {
            return Err(ConfigError::Invalid(format!("scheduler interval for '{job}' must be positive")));
        }
        Ok(())
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.retry.initial_interval_ms),
            self.retry.multiplier,
            Duration::from_millis(self.retry.max_interval_ms),
        )
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            chunk_size: self.archival.chunk_size,
            skip_limit: self.archival.skip_limit,
            retry: RetryPolicy::with_max_attempts(self.retry.max_attempts),
            backoff: self.backoff(),
            unclassified: self.unclassified_errors,
            closed_retention_years: self.archival.closed_retention_years,
            notification_retention_days: self.archival.notification_retention_days,
            enrollment_duration_limit_years: self.reconciliation.enrollment_duration_limit_years,
            artifact_root: self.reconciliation.artifact_root.clone(),
            quarantine_dir: self.reconciliation.quarantine_dir.clone(),
            dry_run: self.reconciliation.dry_run,
            staleness: chrono::Duration::hours(i64::from(self.sweeper.staleness_hours)),
        }
    }

    /// `(job name, interval)` pairs for the scheduler.
    pub fn schedules(&self) -> Vec<(String, Duration)> {
        self.scheduler
            .intervals
            .iter()
            .map(|(job, secs)| (job.clone(), Duration::from_secs(*secs)))
            .collect()
    }
}

//! Infrastructure layer: configuration, durable execution history and the
//! job scheduler.

pub mod config;
pub mod history;
pub mod scheduler;

pub use config::{BatchConfig, ConfigError};
pub use history::PostgresExecutionHistory;
pub use scheduler::{Schedule, Scheduler, SchedulerConfig, SchedulerError, SchedulerHandle, SchedulerStats};

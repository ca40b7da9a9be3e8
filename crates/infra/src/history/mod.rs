//! Durable execution history backends.

pub mod postgres;

pub use postgres::{PostgresExecutionHistory, classify_sqlx_error};

//! Postgres-backed execution history.
//!
//! One row per job execution, keyed by execution id, with a unique
//! `(job_name, run_key)` constraint so a run key can only ever be started once
//! per job even across processes. Step executions and the failure record are
//! stored as JSONB.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | ErrorKind | Scenario |
//! |------------|----------------------|-----------|----------|
//! | Database (serialization failure) | `40001` | `DatabaseDeadlock` | Concurrent transactions conflicted |
//! | Database (deadlock detected) | `40P01` | `DatabaseDeadlock` | Lock cycle between transactions |
//! | Database (connection exception) | `08xxx` | `DatabaseTransient` | Server dropped or refused the connection |
//! | PoolTimedOut / PoolClosed / Io | N/A | `DatabaseTransient` | Pool exhausted or network failure |
//! | ColumnDecode / Decode | N/A | `MalformedInput` | Stored row does not match the schema |
//! | Other | Any other | `Unclassified` | Everything else |
//!
//! ## Runtime
//!
//! [`ExecutionHistory`] is synchronous because the orchestrator runs on plain
//! worker threads. Each call is driven to completion with `block_on` on the
//! tokio runtime handle captured at construction. Calls must therefore come
//! from threads that are not themselves inside that runtime.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::{debug, instrument};

use acadbatch_batch::{
    ExecutionHistory, HistoryError, JobExecution, JobFailure, JobStatus, StepExecution,
};
use acadbatch_core::{ErrorKind, ExecutionId, RunKey};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS batch_job_executions (
        id UUID PRIMARY KEY,
        job_name TEXT NOT NULL,
        run_key TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at TIMESTAMPTZ NOT NULL,
        ended_at TIMESTAMPTZ,
        steps JSONB NOT NULL DEFAULT '[]'::jsonb,
        failure JSONB,
        CONSTRAINT batch_job_executions_run_key UNIQUE (job_name, run_key)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS batch_job_executions_job_started
        ON batch_job_executions (job_name, started_at DESC)
    "#,
];

/// Classify a SQLx error into the shared error taxonomy.
pub fn classify_sqlx_error(err: &sqlx::Error) -> ErrorKind {
    match err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("40001") | Some("40P01") => ErrorKind::DatabaseDeadlock,
            Some(code) if code.starts_with("08") => ErrorKind::DatabaseTransient,
            _ => ErrorKind::Unclassified,
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            ErrorKind::DatabaseTransient
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => ErrorKind::MalformedInput,
        _ => ErrorKind::Unclassified,
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> HistoryError {
    HistoryError::storage(classify_sqlx_error(&err), format!("{operation}: {err}"))
}

fn malformed(operation: &str, err: impl std::fmt::Display) -> HistoryError {
    HistoryError::storage(ErrorKind::MalformedInput, format!("{operation}: {err}"))
}

fn to_json<T: serde::Serialize>(operation: &str, value: &T) -> Result<serde_json::Value, HistoryError> {
    serde_json::to_value(value).map_err(|e| malformed(operation, e))
}

/// Postgres execution history.
#[derive(Clone)]
pub struct PostgresExecutionHistory {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresExecutionHistory {
    /// Must be called from inside a tokio runtime; the current handle is kept.
    pub fn new(pool: PgPool) -> Result<Self, HistoryError> {
        let runtime = Handle::try_current().map_err(|e| {
            HistoryError::storage(
                ErrorKind::Configuration,
                format!("postgres history requires a tokio runtime: {e}"),
            )
        })?;
        Ok(Self::with_runtime(pool, runtime))
    }

    pub fn with_runtime(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Create the history table and index if they do not exist.
    pub async fn migrate(&self) -> Result<(), HistoryError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }

    #[instrument(skip(self, execution), fields(job = %execution.job_name, run_key = %execution.run_key))]
    async fn insert(&self, execution: &JobExecution) -> Result<(), HistoryError> {
        let steps = to_json("begin", &execution.step_executions)?;
        let failure = execution
            .failure
            .as_ref()
            .map(|f| to_json("begin", f))
            .transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO batch_job_executions
                (id, job_name, run_key, status, started_at, ended_at, steps, failure)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (job_name, run_key) DO NOTHING
            "#,
        )
        .bind(*execution.id.as_uuid())
        .bind(&execution.job_name)
        .bind(execution.run_key.as_str())
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .bind(execution.ended_at)
        .bind(steps)
        .bind(failure)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("begin", e))?;

        if result.rows_affected() == 0 {
            return Err(HistoryError::DuplicateRunKey {
                job: execution.job_name.clone(),
                run_key: execution.run_key.clone(),
            });
        }
        debug!("execution inserted");
        Ok(())
    }

    async fn update(&self, execution: &JobExecution) -> Result<(), HistoryError> {
        let steps = to_json("record", &execution.step_executions)?;
        let failure = execution
            .failure
            .as_ref()
            .map(|f| to_json("record", f))
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE batch_job_executions
            SET status = $2, ended_at = $3, steps = $4, failure = $5
            WHERE id = $1
            "#,
        )
        .bind(*execution.id.as_uuid())
        .bind(execution.status.as_str())
        .bind(execution.ended_at)
        .bind(steps)
        .bind(failure)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record", e))?;

        if result.rows_affected() == 0 {
            return Err(HistoryError::NotFound(execution.id));
        }
        Ok(())
    }

    async fn select(&self, job_name: &str, limit: usize) -> Result<Vec<JobExecution>, HistoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT id, job_name, run_key, status, started_at, ended_at, steps, failure
            FROM batch_job_executions
            WHERE job_name = $1
            ORDER BY started_at DESC
            LIMIT $2
            "#,
        )
        .bind(job_name)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query", e))?;

        rows.iter().map(row_to_execution).collect()
    }

    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }
}

fn row_to_execution(row: &sqlx::postgres::PgRow) -> Result<JobExecution, HistoryError> {
    let get = |e: sqlx::Error| map_sqlx_error("query", e);

    let id: uuid::Uuid = row.try_get("id").map_err(get)?;
    let status: String = row.try_get("status").map_err(get)?;
    let steps: serde_json::Value = row.try_get("steps").map_err(get)?;
    let failure: Option<serde_json::Value> = row.try_get("failure").map_err(get)?;
    let run_key: String = row.try_get("run_key").map_err(get)?;
    let started_at: DateTime<Utc> = row.try_get("started_at").map_err(get)?;
    let ended_at: Option<DateTime<Utc>> = row.try_get("ended_at").map_err(get)?;

    let status: JobStatus = serde_json::from_value(serde_json::Value::String(status))
        .map_err(|e| malformed("query status", e))?;
    let step_executions: Vec<StepExecution> =
        serde_json::from_value(steps).map_err(|e| malformed("query steps", e))?;
    let failure: Option<JobFailure> = failure
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| malformed("query failure", e))?;

    Ok(JobExecution {
        id: ExecutionId::from_uuid(id),
        job_name: row.try_get("job_name").map_err(get)?,
        run_key: RunKey::new(run_key),
        status,
        started_at,
        ended_at,
        step_executions,
        failure,
    })
}

impl ExecutionHistory for PostgresExecutionHistory {
    fn begin(&self, execution: &JobExecution) -> Result<(), HistoryError> {
        self.block_on(self.insert(execution))
    }

    fn record(&self, execution: &JobExecution) -> Result<(), HistoryError> {
        self.block_on(self.update(execution))
    }

    fn query(&self, job_name: &str, limit: usize) -> Result<Vec<JobExecution>, HistoryError> {
        self.block_on(self.select(job_name, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_and_io_failures_are_transient() {
        assert_eq!(
            classify_sqlx_error(&sqlx::Error::PoolTimedOut),
            ErrorKind::DatabaseTransient
        );
        assert_eq!(
            classify_sqlx_error(&sqlx::Error::PoolClosed),
            ErrorKind::DatabaseTransient
        );
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(
            classify_sqlx_error(&sqlx::Error::Io(io)),
            ErrorKind::DatabaseTransient
        );
    }

    #[test]
    fn unexpected_errors_stay_unclassified() {
        assert_eq!(
            classify_sqlx_error(&sqlx::Error::RowNotFound),
            ErrorKind::Unclassified
        );
        let err = map_sqlx_error("record", sqlx::Error::RowNotFound);
        assert!(matches!(err, HistoryError::Storage { kind: ErrorKind::Unclassified, .. }));
    }
}

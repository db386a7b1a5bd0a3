//! Workflow statuses reported by spindles, keyed by
//! (spindle, pipeline AT-URI, workflow).

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::DbError;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PipelineStatus {
    pub id: i64,
    pub spindle: String,
    pub pipeline_at: String,
    pub workflow: String,
    pub status: String,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Record the latest status for a workflow. Later reports replace earlier
/// ones for the same key.
pub async fn upsert<'e, E: SqliteExecutor<'e>>(
    exec: E,
    spindle: &str,
    pipeline_at: &str,
    workflow: &str,
    status: &str,
    error: Option<&str>,
    exit_code: Option<i32>,
    created_at: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO pipeline_statuses
             (spindle, pipeline_at, workflow, status, error, exit_code, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (spindle, pipeline_at, workflow) DO UPDATE SET
             status = excluded.status,
             error = excluded.error,
             exit_code = excluded.exit_code,
             created_at = excluded.created_at",
    )
    .bind(spindle)
    .bind(pipeline_at)
    .bind(workflow)
    .bind(status)
    .bind(error)
    .bind(exit_code)
    .bind(created_at)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn get<'e, E: SqliteExecutor<'e>>(
    exec: E,
    spindle: &str,
    pipeline_at: &str,
    workflow: &str,
) -> Result<Option<PipelineStatus>, DbError> {
    Ok(sqlx::query_as(
        "SELECT * FROM pipeline_statuses
         WHERE spindle = ?1 AND pipeline_at = ?2 AND workflow = ?3",
    )
    .bind(spindle)
    .bind(pipeline_at)
    .bind(workflow)
    .fetch_optional(exec)
    .await?)
}

pub async fn list_for_pipeline<'e, E: SqliteExecutor<'e>>(
    exec: E,
    pipeline_at: &str,
) -> Result<Vec<PipelineStatus>, DbError> {
    Ok(
        sqlx::query_as("SELECT * FROM pipeline_statuses WHERE pipeline_at = ?1 ORDER BY workflow")
            .bind(pipeline_at)
            .fetch_all(exec)
            .await?,
    )
}

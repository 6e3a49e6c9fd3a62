//! SQLite step store implementation.
//!
//! Implements `StepStore` from `steadfast-core` using sqlx with the split
//! read/write pool. All mutations go through the single-connection writer
//! pool; writes that still observe a busy/locked error (another process
//! holding the database) retry with linear backoff before surfacing.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use tracing::debug;

use steadfast_core::repository::StepStore;
use steadfast_types::error::StoreError;
use steadfast_types::step::{StepRecord, StepRef, StepStatus};

use super::pool::DatabasePool;

/// Bounded retry for writes that lose the race for the database lock.
const MAX_WRITE_RETRIES: u32 = 8;
const RETRY_BACKOFF: Duration = Duration::from_millis(25);

/// SQLite-backed implementation of `StepStore`.
pub struct SqliteStepStore {
    pool: DatabasePool,
}

impl SqliteStepStore {
    /// Open (or create) the checkpoint database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            pool: DatabasePool::open(path.as_ref()).await?,
        })
    }

    /// Create a store backed by an existing pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct StepRow {
    workflow_id: String,
    step_key: String,
    step_id: String,
    sequence: i64,
    status: String,
    output_json: Option<String>,
    error_text: Option<String>,
    run_id: String,
    started_at: String,
    updated_at: String,
}

impl StepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            workflow_id: row.try_get("workflow_id")?,
            step_key: row.try_get("step_key")?,
            step_id: row.try_get("step_id")?,
            sequence: row.try_get("sequence")?,
            status: row.try_get("status")?,
            output_json: row.try_get("output_json")?,
            error_text: row.try_get("error_text")?,
            run_id: row.try_get("run_id")?,
            started_at: row.try_get("started_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_record(self) -> StepRecord {
        // Foreign status strings map to `Unknown`; a claim resets such rows.
        let status = self.status.parse().unwrap_or(StepStatus::Unknown);
        StepRecord {
            workflow_id: self.workflow_id,
            step_key: self.step_key,
            step_id: self.step_id,
            sequence: self.sequence as u32,
            status,
            output_json: self.output_json,
            error_text: self.error_text,
            run_id: self.run_id,
            started_at: self.started_at,
            updated_at: self.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fixed-width RFC 3339 UTC with nanosecond precision, so that timestamp
/// strings compare lexicographically in time order.
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let message = db.message().to_ascii_lowercase();
            message.contains("database is locked")
                || message.contains("database table is locked")
                || message.contains("busy")
        }
        _ => false,
    }
}

/// The backoff before the next attempt, or `None` when the error is not
/// retryable or the attempt budget is spent.
fn busy_backoff(err: &sqlx::Error, attempt: u32) -> Option<Duration> {
    (attempt < MAX_WRITE_RETRIES && is_busy(err)).then(|| RETRY_BACKOFF * (attempt + 1))
}

// ---------------------------------------------------------------------------
// StepStore impl
// ---------------------------------------------------------------------------

impl StepStore for SqliteStepStore {
    async fn get_step(
        &self,
        workflow_id: &str,
        step_key: &str,
    ) -> Result<Option<StepRecord>, StoreError> {
        let row = sqlx::query(
            r#"SELECT workflow_id, step_key, step_id, sequence, status,
                      output_json, error_text, run_id, started_at, updated_at
               FROM steps
               WHERE workflow_id = ? AND step_key = ?"#,
        )
        .bind(workflow_id)
        .bind(step_key)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = StepRow::from_row(&row).map_err(|e| StoreError::Query(e.to_string()))?;
                Ok(Some(r.into_record()))
            }
            None => Ok(None),
        }
    }

    async fn upsert_running(
        &self,
        workflow_id: &str,
        step: &StepRef,
        run_id: &str,
    ) -> Result<(), StoreError> {
        let now = format_timestamp(&Utc::now());
        let mut attempt = 0;
        loop {
            // The WHERE clause on the conflict update keeps completed rows
            // untouched: completion is terminal for the key.
            let result = sqlx::query(
                r#"INSERT INTO steps
                     (workflow_id, step_key, step_id, sequence, status,
                      output_json, error_text, run_id, started_at, updated_at)
                   VALUES (?, ?, ?, ?, ?, NULL, NULL, ?, ?, ?)
                   ON CONFLICT(workflow_id, step_key) DO UPDATE SET
                     status = excluded.status,
                     output_json = NULL,
                     error_text = NULL,
                     run_id = excluded.run_id,
                     started_at = excluded.started_at,
                     updated_at = excluded.updated_at
                   WHERE steps.status <> ?"#,
            )
            .bind(workflow_id)
            .bind(&step.step_key)
            .bind(&step.step_id)
            .bind(step.sequence as i64)
            .bind(StepStatus::Running.as_str())
            .bind(run_id)
            .bind(&now)
            .bind(&now)
            .bind(StepStatus::Completed.as_str())
            .execute(&self.pool.writer)
            .await;

            match result {
                Ok(_) => return Ok(()),
                Err(err) => match busy_backoff(&err, attempt) {
                    Some(delay) => {
                        attempt += 1;
                        debug!(attempt, step_key = %step.step_key, "sqlite busy, retrying claim");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(StoreError::Query(err.to_string())),
                },
            }
        }
    }

    async fn mark_completed(
        &self,
        workflow_id: &str,
        step_key: &str,
        run_id: &str,
        output_json: &str,
    ) -> Result<(), StoreError> {
        let now = format_timestamp(&Utc::now());
        let mut attempt = 0;
        loop {
            let result = sqlx::query(
                r#"UPDATE steps
                   SET status = ?, output_json = ?, error_text = NULL,
                       run_id = ?, updated_at = ?
                   WHERE workflow_id = ? AND step_key = ?"#,
            )
            .bind(StepStatus::Completed.as_str())
            .bind(output_json)
            .bind(run_id)
            .bind(&now)
            .bind(workflow_id)
            .bind(step_key)
            .execute(&self.pool.writer)
            .await;

            match result {
                Ok(done) if done.rows_affected() == 0 => return Err(StoreError::NotFound),
                Ok(_) => return Ok(()),
                Err(err) => match busy_backoff(&err, attempt) {
                    Some(delay) => {
                        attempt += 1;
                        debug!(attempt, step_key, "sqlite busy, retrying completion");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(StoreError::Query(err.to_string())),
                },
            }
        }
    }

    async fn mark_failed(
        &self,
        workflow_id: &str,
        step_key: &str,
        run_id: &str,
        error_text: &str,
    ) -> Result<(), StoreError> {
        let now = format_timestamp(&Utc::now());
        let mut attempt = 0;
        loop {
            let result = sqlx::query(
                r#"UPDATE steps
                   SET status = ?, output_json = NULL, error_text = ?,
                       run_id = ?, updated_at = ?
                   WHERE workflow_id = ? AND step_key = ?"#,
            )
            .bind(StepStatus::Failed.as_str())
            .bind(error_text)
            .bind(run_id)
            .bind(&now)
            .bind(workflow_id)
            .bind(step_key)
            .execute(&self.pool.writer)
            .await;

            match result {
                Ok(done) if done.rows_affected() == 0 => return Err(StoreError::NotFound),
                Ok(_) => return Ok(()),
                Err(err) => match busy_backoff(&err, attempt) {
                    Some(delay) => {
                        attempt += 1;
                        debug!(attempt, step_key, "sqlite busy, retrying failure mark");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(StoreError::Query(err.to_string())),
                },
            }
        }
    }

    async fn list_steps(&self, workflow_id: &str) -> Result<Vec<StepRecord>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT workflow_id, step_key, step_id, sequence, status,
                      output_json, error_text, run_id, started_at, updated_at
               FROM steps
               WHERE workflow_id = ?
               ORDER BY step_key ASC"#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = StepRow::from_row(row).map_err(|e| StoreError::Query(e.to_string()))?;
            records.push(r.into_record());
        }
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Database pool with split reader/writer connections in WAL mode.
//!
//! SQLite allows only one writer at a time. This module provides a
//! `DatabasePool` with a multi-connection reader pool for concurrent reads
//! and a single-connection writer pool: the writer pool is the process-wide
//! serialization point for all step-table mutations. Both pools use WAL
//! journal mode, synchronous NORMAL, and a 5-second busy timeout so that
//! contention with other processes blocks rather than failing immediately.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use steadfast_types::error::StoreError;

/// Split read/write pool for SQLite with WAL mode.
///
/// - `reader`: multi-connection pool (up to 8) for concurrent SELECT queries.
/// - `writer`: single-connection pool for serialized INSERT/UPDATE.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// The parent directory is created if missing. Migrations run on the
    /// writer pool before the reader pool is opened.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Connection(format!("create db dir: {e}")))?;
            }
        }

        let base_opts = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let read_opts = base_opts.clone().read_only(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(base_opts)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        sqlx::migrate!("../../migrations")
            .run(&writer)
            .await
            .map_err(|e| StoreError::Migrate(e.to_string()))?;

        let reader = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(read_opts)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self { reader, writer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        DatabasePool::open(&path).await.unwrap()
    }

    #[tokio::test]
    async fn open_creates_steps_table() {
        let pool = open_pool().await;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&pool.reader)
        .await
        .unwrap();

        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(names, ["steps"]);
    }

    #[tokio::test]
    async fn open_enables_wal_mode() {
        let pool = open_pool().await;

        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool.writer)
            .await
            .unwrap();
        assert_eq!(mode.0.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn open_creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("test.db");
        std::mem::forget(dir);
        DatabasePool::open(&path).await.unwrap();
        assert!(path.exists());
    }
}

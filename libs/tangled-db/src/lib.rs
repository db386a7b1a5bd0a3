//! SQLite persistence for the appview.
//!
//! Layering: one module per entity family, each exposing free functions that
//! take `impl SqliteExecutor` so callers decide the transaction scope. The
//! ingester and the write coordinator both run multi-store mutations inside
//! a single transaction obtained from [`Db::begin`].
//!
//! Return-type conventions:
//! - get by unique key → `Result<Option<T>>`
//! - list → `Result<Vec<T>>`
//! - insert/upsert → `Result<()>` or `Result<T>` when generated columns matter
//! - delete → `Result<bool>` (whether a row existed)

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqlitePool, Transaction};

pub mod artifacts;
pub mod cursors;
pub mod emails;
pub mod graph;
pub mod issues;
pub mod knots;
pub mod labels;
pub mod notifications;
pub mod pipelines;
pub mod profiles;
pub mod public_keys;
pub mod pulls;
pub mod punches;
pub mod refs;
pub mod repos;
pub mod spindles;
pub mod strings;

mod error;

pub use error::DbError;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Handle to the appview database.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Open (creating if missing) the database at `path` and run pending
    /// migrations. WAL mode keeps readers unblocked during ingestion.
    pub async fn connect(path: &str) -> Result<Self, DbError> {
        let opts = SqliteConnectOptions::from_str(path)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(opts)
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory database for tests. A single connection keeps every query
    /// on the same ephemeral database.
    pub async fn connect_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, sqlx::Sqlite>, DbError> {
        Ok(self.pool.begin().await?)
    }
}

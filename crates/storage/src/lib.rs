//! Storage layer: SQLite schema, the durable scan queue and the file index.
//!
//! Holds DB pool setup and migration runner. The pool returned by [`connect`] is the
//! single storage handle every other component receives.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub mod files;
pub mod models;
pub mod queue;

pub use models::{FileRecord, ImageMeta, ScanRecord, Task, TaskKind};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unknown task kind `{0}` in scan_queue")]
    UnknownTaskKind(String),
}

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let mut url = database_url.to_string();
    if !database_url.starts_with("sqlite:") {
        let path = std::path::PathBuf::from(database_url);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let norm = path.to_string_lossy().replace('\\', "/");
        if path.is_absolute() {
            url = format!("sqlite:///{}", norm.trim_start_matches('/'));
        } else {
            url = format!("sqlite://{}", norm);
        }
    }
    let in_memory = url.contains("memory");
    let mut opts = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    if !in_memory {
        opts = opts
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
    }
    let mut pool_opts = SqlitePoolOptions::new();
    if in_memory {
        pool_opts = pool_opts.max_connections(1);
    } else {
        pool_opts = pool_opts.max_connections(5);
    }
    let pool = pool_opts.connect_with(opts).await?;
    tracing::debug!(%url, "opened index database");
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    // Applies SQLx migrations located in crates/storage/migrations.
    // Safe to run multiple times (idempotent).
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Current wall-clock time in unix seconds, the unit of every `*_unix` column.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::SqlitePool;
    use tempfile::TempDir;

    pub async fn fresh_pool() -> (TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("index.db");
        let pool = crate::connect(&db.to_string_lossy()).await.unwrap();
        crate::migrate(&pool).await.unwrap();
        (dir, pool)
    }
}

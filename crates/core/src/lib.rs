//! Core library: traversal, content probes, the two crawlers and the task dispatcher.

pub mod config;
pub mod crawler;
pub mod dispatcher;
pub mod extractor;
pub mod handlers;
pub mod scanner;
pub mod watch;

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::SqlitePool;
    use tempfile::TempDir;

    /// A migrated database in its own temp directory. Keep the dir alive for the test.
    pub async fn fresh_pool() -> (TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("index.db");
        let pool = storage::connect(&db.to_string_lossy()).await.unwrap();
        storage::migrate(&pool).await.unwrap();
        (dir, pool)
    }
}

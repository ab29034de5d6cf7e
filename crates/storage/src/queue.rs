//! Durable, deduplicated work queue (`scan_queue`), keyed by (path, kind).
//!
//! All functions take any SQLite executor so callers can run them on the pool or
//! inside an open transaction.

use crate::models::{Task, TaskKind};
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use std::time::Duration;

/// Inserts the task or, if (path, kind) is already queued, replaces its due time.
/// `attempts` is never touched by a re-enqueue.
pub async fn enqueue<'e, E>(executor: E, path: &str, kind: TaskKind, due_at: i64) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO scan_queue (path, kind, not_before_unix, attempts)
        VALUES (?1, ?2, ?3, 0)
        ON CONFLICT(path, kind) DO UPDATE SET not_before_unix = excluded.not_before_unix
        "#,
    )
    .bind(path)
    .bind(kind.as_str())
    .bind(due_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// Enqueues every path with the same kind and due time in one transaction.
pub async fn enqueue_many(
    pool: &SqlitePool,
    paths: &[String],
    kind: TaskKind,
    due_at: i64,
) -> anyhow::Result<usize> {
    if paths.is_empty() {
        return Ok(0);
    }
    let mut tx = pool.begin().await?;
    for path in paths {
        enqueue(&mut *tx, path, kind, due_at).await?;
    }
    tx.commit().await?;
    Ok(paths.len())
}

/// `'file', 'image_deep'`: the tags of every [`TaskKind`], for `IN (..)` clauses.
fn known_kinds() -> String {
    TaskKind::ALL
        .iter()
        .map(|k| format!("'{}'", k.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Up to `limit` tasks due at or before `now`, earliest first, ties broken by kind then id.
/// Rows whose kind this build does not know are never returned; see [`discard_unknown_kinds`].
pub async fn dequeue_due<'e, E>(executor: E, limit: i64, now: i64) -> anyhow::Result<Vec<Task>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        r#"
        SELECT id, path, kind, not_before_unix, attempts
        FROM scan_queue
        WHERE not_before_unix <= ?1 AND kind IN ({})
        ORDER BY not_before_unix, kind, id
        LIMIT ?2
        "#,
        known_kinds()
    );
    let rows = sqlx::query(&sql)
        .bind(now)
        .bind(limit)
        .fetch_all(executor)
        .await?;

    let mut tasks = Vec::with_capacity(rows.len());
    for row in rows {
        let kind: String = row.get("kind");
        tasks.push(Task {
            id: row.get("id"),
            path: row.get("path"),
            kind: kind.parse()?,
            due_at: row.get("not_before_unix"),
            attempts: row.get("attempts"),
        });
    }
    Ok(tasks)
}

/// Deletes rows carrying a kind no handler exists for, e.g. left behind by another
/// version of the indexer. Returns how many were dropped.
pub async fn discard_unknown_kinds<'e, E>(executor: E) -> anyhow::Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("DELETE FROM scan_queue WHERE kind NOT IN ({})", known_kinds());
    let done = sqlx::query(&sql).execute(executor).await?;
    Ok(done.rows_affected())
}

/// Final, successful handling: the row goes away.
pub async fn complete<'e, E>(executor: E, id: i64) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM scan_queue WHERE id = ?1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn fail_and_backoff<'e, E>(executor: E, id: i64, delay: Duration) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    fail_and_backoff_at(executor, id, delay, crate::unix_now()).await
}

/// Counts one more failed attempt and pushes the task to `now + delay`.
pub async fn fail_and_backoff_at<'e, E>(
    executor: E,
    id: i64,
    delay: Duration,
    now: i64,
) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE scan_queue SET attempts = attempts + 1, not_before_unix = ?1 WHERE id = ?2")
        .bind(now + delay.as_secs() as i64)
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Looks up the queued task for (path, kind), if any.
pub async fn find<'e, E>(executor: E, path: &str, kind: TaskKind) -> anyhow::Result<Option<Task>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, not_before_unix, attempts FROM scan_queue WHERE path = ?1 AND kind = ?2",
    )
    .bind(path)
    .bind(kind.as_str())
    .fetch_optional(executor)
    .await?;
    Ok(row.map(|r| Task {
        id: r.get("id"),
        path: path.to_string(),
        kind,
        due_at: r.get("not_before_unix"),
        attempts: r.get("attempts"),
    }))
}

pub async fn count_kind<'e, E>(executor: E, kind: TaskKind) -> anyhow::Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scan_queue WHERE kind = ?1")
        .bind(kind.as_str())
        .fetch_one(executor)
        .await?;
    Ok(n)
}

pub async fn pending_count<'e, E>(executor: E) -> anyhow::Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scan_queue")
        .fetch_one(executor)
        .await?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fresh_pool;

    #[tokio::test]
    async fn reenqueue_replaces_due_time_and_keeps_one_row() {
        let (_dir, pool) = fresh_pool().await;

        enqueue(&pool, "/a/b.jpg", TaskKind::MetadataScan, 500).await.unwrap();
        enqueue(&pool, "/a/b.jpg", TaskKind::MetadataScan, 100).await.unwrap();

        assert_eq!(pending_count(&pool).await.unwrap(), 1);
        let task = find(&pool, "/a/b.jpg", TaskKind::MetadataScan)
            .await
            .unwrap()
            .unwrap();
        // Overwrite, not min/max merge.
        assert_eq!(task.due_at, 100);

        enqueue(&pool, "/a/b.jpg", TaskKind::MetadataScan, 900).await.unwrap();
        let task = find(&pool, "/a/b.jpg", TaskKind::MetadataScan)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.due_at, 900);
    }

    #[tokio::test]
    async fn reenqueue_leaves_attempts_alone() {
        let (_dir, pool) = fresh_pool().await;
        enqueue(&pool, "/x.png", TaskKind::DeepImageScan, 10).await.unwrap();
        let id = find(&pool, "/x.png", TaskKind::DeepImageScan)
            .await
            .unwrap()
            .unwrap()
            .id;
        fail_and_backoff_at(&pool, id, Duration::from_secs(300), 10)
            .await
            .unwrap();

        enqueue(&pool, "/x.png", TaskKind::DeepImageScan, 20).await.unwrap();
        let task = find(&pool, "/x.png", TaskKind::DeepImageScan)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.id, id);
        assert_eq!(task.attempts, 1);
        assert_eq!(task.due_at, 20);
    }

    #[tokio::test]
    async fn same_path_different_kinds_are_distinct_rows() {
        let (_dir, pool) = fresh_pool().await;
        enqueue(&pool, "/p.jpg", TaskKind::MetadataScan, 1).await.unwrap();
        enqueue(&pool, "/p.jpg", TaskKind::DeepImageScan, 1).await.unwrap();
        assert_eq!(pending_count(&pool).await.unwrap(), 2);
        assert_eq!(count_kind(&pool, TaskKind::DeepImageScan).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dequeue_orders_by_due_then_kind_then_id() {
        let (_dir, pool) = fresh_pool().await;
        enqueue(&pool, "/late.txt", TaskKind::MetadataScan, 30).await.unwrap();
        enqueue(&pool, "/b.jpg", TaskKind::DeepImageScan, 10).await.unwrap();
        enqueue(&pool, "/c.txt", TaskKind::MetadataScan, 10).await.unwrap();
        enqueue(&pool, "/a.txt", TaskKind::MetadataScan, 10).await.unwrap();
        enqueue(&pool, "/early.jpg", TaskKind::DeepImageScan, 5).await.unwrap();
        enqueue(&pool, "/future.txt", TaskKind::MetadataScan, 99).await.unwrap();

        let tasks = dequeue_due(&pool, 10, 50).await.unwrap();
        let order: Vec<&str> = tasks.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(
            order,
            vec!["/early.jpg", "/c.txt", "/a.txt", "/b.jpg", "/late.txt"]
        );
        for pair in tasks.windows(2) {
            let a = (pair[0].due_at, pair[0].kind.as_str(), pair[0].id);
            let b = (pair[1].due_at, pair[1].kind.as_str(), pair[1].id);
            assert!(a < b, "{:?} should sort before {:?}", a, b);
        }

        // Non-destructive and limited.
        let first_two = dequeue_due(&pool, 2, 50).await.unwrap();
        assert_eq!(first_two.len(), 2);
        assert_eq!(first_two[0].path, "/early.jpg");
        assert_eq!(pending_count(&pool).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn foreign_kinds_are_skipped_then_discarded() {
        let (_dir, pool) = fresh_pool().await;
        sqlx::query("INSERT INTO scan_queue (path, kind, not_before_unix) VALUES ('/legacy', 'thumbnail', 0)")
            .execute(&pool)
            .await
            .unwrap();
        enqueue(&pool, "/ok.txt", TaskKind::MetadataScan, 0).await.unwrap();

        let tasks = dequeue_due(&pool, 10, 50).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].path, "/ok.txt");

        assert_eq!(discard_unknown_kinds(&pool).await.unwrap(), 1);
        assert_eq!(discard_unknown_kinds(&pool).await.unwrap(), 0);
        assert_eq!(pending_count(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn repeated_failures_count_attempts_and_push_due_time() {
        let (_dir, pool) = fresh_pool().await;
        enqueue(&pool, "/broken.png", TaskKind::MetadataScan, 0).await.unwrap();
        let id = find(&pool, "/broken.png", TaskKind::MetadataScan)
            .await
            .unwrap()
            .unwrap()
            .id;

        let mut failed_at = 1_000;
        for n in 1..=4 {
            failed_at += 7 * n;
            fail_and_backoff_at(&pool, id, Duration::from_secs(300), failed_at)
                .await
                .unwrap();
            let task = find(&pool, "/broken.png", TaskKind::MetadataScan)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(task.attempts, n);
            assert_eq!(task.due_at, failed_at + 300);
        }
    }

    #[tokio::test]
    async fn complete_removes_only_that_row() {
        let (_dir, pool) = fresh_pool().await;
        enqueue_many(
            &pool,
            &["/1.txt".to_string(), "/2.txt".to_string()],
            TaskKind::MetadataScan,
            0,
        )
        .await
        .unwrap();
        let tasks = dequeue_due(&pool, 10, 0).await.unwrap();
        complete(&pool, tasks[0].id).await.unwrap();

        let left = dequeue_due(&pool, 10, 0).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, tasks[1].id);
    }
}

//! File index writes: `files` and `image_meta` upserts keyed by path.

use crate::models::{FileRecord, ImageMeta, ScanRecord, MISSING};
use sqlx::{Executor, Sqlite};

/// Replaces every stat/classification column of the row for `record.path`.
/// Hash and label columns belong to the deep pass and the label service and survive.
pub async fn upsert_scan<'e, E>(executor: E, record: &ScanRecord) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO files (path, parent_path, size_bytes, mtime_unix, ctime_unix, last_scanned_unix, kind, ext)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(path) DO UPDATE SET
            parent_path = excluded.parent_path,
            size_bytes = excluded.size_bytes,
            mtime_unix = excluded.mtime_unix,
            ctime_unix = excluded.ctime_unix,
            last_scanned_unix = excluded.last_scanned_unix,
            kind = excluded.kind,
            ext = excluded.ext
        "#,
    )
    .bind(&record.path)
    .bind(&record.parent_path)
    .bind(record.size_bytes)
    .bind(record.mtime_unix)
    .bind(record.ctime_unix)
    .bind(record.last_scanned_unix)
    .bind(&record.classification)
    .bind(&record.ext)
    .execute(executor)
    .await?;
    Ok(())
}

/// Flags an already indexed path as vanished without touching its other columns.
pub async fn mark_missing<'e, E>(executor: E, path: &str, now: i64) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE files SET last_scanned_unix = ?1, kind = ?2 WHERE path = ?3")
        .bind(now)
        .bind(MISSING)
        .bind(path)
        .execute(executor)
        .await?;
    Ok(())
}

/// Stores the outcome of a deep pass. `label` is the dimension summary, `None` clears it.
pub async fn record_deep_scan<'e, E>(
    executor: E,
    path: &str,
    now: i64,
    content_hash: Option<&str>,
    label: Option<&str>,
) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE files SET last_scanned_unix = ?1, content_hash = ?2, type_label = ?3 WHERE path = ?4",
    )
    .bind(now)
    .bind(content_hash)
    .bind(label)
    .bind(path)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn upsert_image_meta<'e, E>(executor: E, meta: &ImageMeta) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO image_meta (path, width, height, exif_taken_unix, camera_make, camera_model)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(path) DO UPDATE SET
            width = excluded.width,
            height = excluded.height,
            exif_taken_unix = excluded.exif_taken_unix,
            camera_make = excluded.camera_make,
            camera_model = excluded.camera_model
        "#,
    )
    .bind(&meta.path)
    .bind(meta.width)
    .bind(meta.height)
    .bind(meta.exif_taken_unix)
    .bind(&meta.camera_make)
    .bind(&meta.camera_model)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn get_file<'e, E>(executor: E, path: &str) -> anyhow::Result<Option<FileRecord>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let record = sqlx::query_as::<_, FileRecord>(
        r#"
        SELECT path, parent_path, size_bytes, mtime_unix, ctime_unix, last_scanned_unix,
               content_hash, kind, type_label, type_label_confidence, type_label_source,
               type_label_updated_unix, ext
        FROM files WHERE path = ?1
        "#,
    )
    .bind(path)
    .fetch_optional(executor)
    .await?;
    Ok(record)
}

pub async fn get_image_meta<'e, E>(executor: E, path: &str) -> anyhow::Result<Option<ImageMeta>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let meta = sqlx::query_as::<_, ImageMeta>(
        "SELECT path, width, height, exif_taken_unix, camera_make, camera_model FROM image_meta WHERE path = ?1",
    )
    .bind(path)
    .fetch_optional(executor)
    .await?;
    Ok(meta)
}

pub async fn count_files<'e, E>(executor: E) -> anyhow::Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
        .fetch_one(executor)
        .await?;
    Ok(n)
}

pub async fn count_image_meta<'e, E>(executor: E) -> anyhow::Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM image_meta")
        .fetch_one(executor)
        .await?;
    Ok(n)
}

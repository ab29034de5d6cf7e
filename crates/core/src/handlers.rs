//! Task handlers. The metadata pass is cheap (stat + sniff) and feeds the deep image
//! pass, which decodes dimensions and hashes content.
//!
//! Handlers write through the connection they are given so the dispatcher decides
//! what commits. Filesystem work runs on the blocking pool.

use crate::extractor::{self, ExifFields, HASH_CAP_BYTES};
use crate::scanner;
use sqlx::SqliteConnection;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use storage::{files, queue, unix_now, ImageMeta, ScanRecord, TaskKind};
use tokio::task;
use tracing::debug;

/// How long passive mode postpones a deep image scan.
pub const HEAVY_DEFERRAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Done for good; the task row can be deleted.
    Completed,
    /// Not an error: run the same task again at `until`.
    Deferred { until: i64 },
}

struct StatProbe {
    size: i64,
    mtime: i64,
    ctime: i64,
    ext: String,
    mime: Option<String>,
}

fn parent_of(path: &Path) -> String {
    path.parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn unix_secs(t: io::Result<SystemTime>) -> i64 {
    t.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// `Ok(None)` when the path is gone; other I/O failures are errors so the task retries.
fn probe_stat(path: &Path) -> io::Result<Option<StatProbe>> {
    let meta = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let ext = scanner::extension_of(path);
    let mime = extractor::sniff_mime(path, &ext);
    Ok(Some(StatProbe {
        size: meta.len() as i64,
        mtime: unix_secs(meta.modified()),
        ctime: unix_secs(meta.created()),
        ext,
        mime,
    }))
}

pub async fn scan_metadata(conn: &mut SqliteConnection, path: &str) -> anyhow::Result<HandlerOutcome> {
    let now = unix_now();
    let fs_path = PathBuf::from(path);
    let parent = parent_of(&fs_path);

    let probe = task::spawn_blocking(move || probe_stat(&fs_path)).await??;
    let Some(probe) = probe else {
        debug!(path, "file vanished, marking missing");
        files::upsert_scan(&mut *conn, &ScanRecord::missing(path, &parent, now)).await?;
        return Ok(HandlerOutcome::Completed);
    };

    let is_image = probe
        .mime
        .as_deref()
        .map(extractor::is_image_mime)
        .unwrap_or(false);
    let record = ScanRecord {
        path: path.to_string(),
        parent_path: parent,
        size_bytes: probe.size,
        mtime_unix: probe.mtime,
        ctime_unix: probe.ctime,
        last_scanned_unix: now,
        classification: probe.mime,
        ext: Some(probe.ext),
    };
    files::upsert_scan(&mut *conn, &record).await?;

    if is_image {
        queue::enqueue(&mut *conn, path, TaskKind::DeepImageScan, now).await?;
    }
    Ok(HandlerOutcome::Completed)
}

struct ImageProbe {
    dims: Option<(u32, u32)>,
    exif: ExifFields,
    hash: String,
}

fn probe_image(path: &Path) -> io::Result<Option<ImageProbe>> {
    if !path.exists() {
        return Ok(None);
    }
    let dims = extractor::image_dimensions(path);
    let exif = if dims.is_some() {
        extractor::read_exif(path)
    } else {
        ExifFields::default()
    };
    let hash = extractor::hash_prefix(path, HASH_CAP_BYTES)?;
    Ok(Some(ImageProbe { dims, exif, hash }))
}

/// With `defer` set the expensive work never runs here; the task is pushed an hour out.
pub async fn scan_image(
    conn: &mut SqliteConnection,
    path: &str,
    defer: bool,
) -> anyhow::Result<HandlerOutcome> {
    let now = unix_now();
    if defer {
        return Ok(HandlerOutcome::Deferred {
            until: now + HEAVY_DEFERRAL.as_secs() as i64,
        });
    }

    let fs_path = PathBuf::from(path);
    let probe = task::spawn_blocking(move || probe_image(&fs_path)).await??;
    let Some(probe) = probe else {
        debug!(path, "image vanished before deep scan");
        files::mark_missing(&mut *conn, path, now).await?;
        return Ok(HandlerOutcome::Completed);
    };

    let label = probe.dims.map(|(w, h)| format!("{}x{}", w, h));
    if let Some((width, height)) = probe.dims {
        let meta = ImageMeta {
            path: path.to_string(),
            width: Some(width as i64),
            height: Some(height as i64),
            exif_taken_unix: probe.exif.taken_unix,
            camera_make: probe.exif.camera_make,
            camera_model: probe.exif.camera_model,
        };
        files::upsert_image_meta(&mut *conn, &meta).await?;
    }
    files::record_deep_scan(&mut *conn, path, now, Some(&probe.hash), label.as_deref()).await?;
    Ok(HandlerOutcome::Completed)
}

use crate::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Work categories understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// Cheap stat + classification pass.
    MetadataScan,
    /// Dimension decode and content hash of an image.
    DeepImageScan,
}

impl TaskKind {
    pub const ALL: [TaskKind; 2] = [TaskKind::MetadataScan, TaskKind::DeepImageScan];

    /// Tag stored in `scan_queue.kind`. Ordering of the queue tie-break follows these strings.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::MetadataScan => "file",
            TaskKind::DeepImageScan => "image_deep",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(TaskKind::MetadataScan),
            "image_deep" => Ok(TaskKind::DeepImageScan),
            other => Err(StorageError::UnknownTaskKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: i64,
    pub path: String,
    pub kind: TaskKind,
    pub due_at: i64,
    pub attempts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileRecord {
    pub path: String,
    pub parent_path: String,
    pub size_bytes: i64,
    pub mtime_unix: i64,
    pub ctime_unix: Option<i64>,
    pub last_scanned_unix: i64,
    pub content_hash: Option<String>,
    /// MIME type, or `missing` once the file vanished.
    #[sqlx(rename = "kind")]
    pub classification: Option<String>,
    #[sqlx(rename = "type_label")]
    pub label: Option<String>,
    #[sqlx(rename = "type_label_confidence")]
    pub label_confidence: Option<f64>,
    #[sqlx(rename = "type_label_source")]
    pub label_source: Option<String>,
    #[sqlx(rename = "type_label_updated_unix")]
    pub label_updated_unix: Option<i64>,
    pub ext: Option<String>,
}

/// Columns written by the metadata pass. Label and hash columns are left to their owners.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRecord {
    pub path: String,
    pub parent_path: String,
    pub size_bytes: i64,
    pub mtime_unix: i64,
    pub ctime_unix: i64,
    pub last_scanned_unix: i64,
    pub classification: Option<String>,
    pub ext: Option<String>,
}

pub const MISSING: &str = "missing";

impl ScanRecord {
    /// Tombstone for a path that no longer exists: zeroed sizes and times.
    pub fn missing(path: &str, parent_path: &str, now: i64) -> Self {
        Self {
            path: path.to_string(),
            parent_path: parent_path.to_string(),
            size_bytes: 0,
            mtime_unix: 0,
            ctime_unix: 0,
            last_scanned_unix: now,
            classification: Some(MISSING.to_string()),
            ext: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImageMeta {
    pub path: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub exif_taken_unix: Option<i64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
}

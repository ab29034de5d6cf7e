//! One-shot exhaustive crawl: a pool of blocking walkers feeds a bounded hand-off
//! channel, and a single writer turns it into batched queue upserts.

use crate::config::ActiveConfig;
use crate::scanner::{self, ScanFilter};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use storage::{queue, unix_now, TaskKind};
use tokio::sync::{mpsc, Semaphore};
use tokio::task;
use tracing::{debug, info, warn};

/// How long the writer waits on an empty channel before polling again.
const WRITER_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSettings {
    /// Walkers allowed to run at once.
    pub threads: usize,
    /// Capacity of the hand-off channel between walkers and the writer.
    pub queue_capacity: usize,
    /// Paths per committed writer transaction.
    pub batch_size: usize,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self::from(&ActiveConfig::default())
    }
}

impl From<&ActiveConfig> for CrawlSettings {
    fn from(cfg: &ActiveConfig) -> Self {
        Self {
            threads: cfg.threads.max(1),
            queue_capacity: cfg.queue_capacity.max(1),
            batch_size: cfg.batch_size.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    pub roots: usize,
    /// Paths handed to the writer, duplicates included.
    pub discovered: u64,
    /// Upserts the writer committed.
    pub enqueued: u64,
}

enum Handoff {
    Path(PathBuf),
    /// Pushed once, after the last walker returned.
    Done,
}

pub struct BulkCrawler {
    pool: SqlitePool,
    settings: CrawlSettings,
    filter: ScanFilter,
}

impl BulkCrawler {
    pub fn new(pool: SqlitePool, settings: CrawlSettings, filter: ScanFilter) -> Self {
        Self {
            pool,
            settings,
            filter,
        }
    }

    /// Walks every root to the bottom and queues a metadata scan for each accepted file.
    /// Returns once all walkers finished and the writer flushed its last batch.
    pub async fn run(&self, roots: &[PathBuf]) -> anyhow::Result<CrawlSummary> {
        let (tx, rx) = mpsc::channel(self.settings.queue_capacity);
        let due_at = unix_now();
        let writer = tokio::spawn(write_batches(
            self.pool.clone(),
            rx,
            self.settings.batch_size,
            due_at,
        ));
        info!(roots = roots.len(), threads = self.settings.threads, "bulk crawl started");

        let permits = Arc::new(Semaphore::new(self.settings.threads));
        let mut walkers = Vec::new();
        let mut summary = CrawlSummary::default();
        for root in roots {
            if !root.is_dir() {
                warn!(root = %root.display(), "skipping root that is not a directory");
                continue;
            }
            summary.roots += 1;
            let permit = permits.clone().acquire_owned().await?;
            let tx = tx.clone();
            let filter = self.filter.clone();
            let root = root.clone();
            walkers.push(task::spawn_blocking(move || {
                let _permit = permit;
                walk_root(&root, &filter, &tx)
            }));
        }

        for walker in walkers {
            summary.discovered += walker.await?;
        }
        // A closed channel means the writer already failed; its error surfaces below.
        let _ = tx.send(Handoff::Done).await;
        drop(tx);

        summary.enqueued = writer.await??;
        info!(
            discovered = summary.discovered,
            enqueued = summary.enqueued,
            "bulk crawl finished"
        );
        Ok(summary)
    }
}

fn walk_root(root: &Path, filter: &ScanFilter, tx: &mpsc::Sender<Handoff>) -> u64 {
    let mut sent = 0u64;
    for file in scanner::walk(root, filter) {
        // Blocks while the channel is full.
        if tx.blocking_send(Handoff::Path(file.path)).is_err() {
            warn!(root = %root.display(), "writer gone, stopping walk");
            break;
        }
        sent += 1;
    }
    debug!(root = %root.display(), files = sent, "walker finished");
    sent
}

async fn write_batches(
    pool: SqlitePool,
    mut rx: mpsc::Receiver<Handoff>,
    batch_size: usize,
    due_at: i64,
) -> anyhow::Result<u64> {
    let mut pending: Vec<String> = Vec::with_capacity(batch_size);
    let mut written = 0u64;
    loop {
        match tokio::time::timeout(WRITER_POLL, rx.recv()).await {
            Err(_) => continue,
            Ok(None) | Ok(Some(Handoff::Done)) => break,
            Ok(Some(Handoff::Path(path))) => {
                pending.push(path.to_string_lossy().into_owned());
                if pending.len() >= batch_size {
                    written += flush(&pool, &mut pending, due_at).await?;
                }
            }
        }
    }
    written += flush(&pool, &mut pending, due_at).await?;
    Ok(written)
}

async fn flush(pool: &SqlitePool, pending: &mut Vec<String>, due_at: i64) -> anyhow::Result<u64> {
    let n = queue::enqueue_many(pool, pending, TaskKind::MetadataScan, due_at).await?;
    pending.clear();
    Ok(n as u64)
}

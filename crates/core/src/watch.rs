//! Incremental discovery for passive mode.
//!
//! Two fixed-delay jobs feed the queue: a drain of filesystem notifications, and a
//! trickle sample that lists the immediate children of each root under a files-per-
//! second budget. The sample catches whatever the notifications miss or coalesce.

use crate::config::PassiveConfig;
use crate::scanner::{self, ScanFilter};
use anyhow::anyhow;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sqlx::SqlitePool;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self as std_mpsc, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storage::{queue, unix_now, TaskKind};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Drained file events are committed in batches of this size.
const DRAIN_FLUSH: usize = 400;

type SharedWatcher = Arc<Mutex<RecommendedWatcher>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSettings {
    pub max_files_per_second: u32,
    pub drain_interval: Duration,
    pub trickle_interval: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self::from(&PassiveConfig::default())
    }
}

impl From<&PassiveConfig> for WatchSettings {
    fn from(cfg: &PassiveConfig) -> Self {
        Self {
            max_files_per_second: cfg.max_files_per_second,
            drain_interval: Duration::from_millis(cfg.drain_interval_ms),
            trickle_interval: Duration::from_millis(cfg.trickle_interval_ms),
        }
    }
}

impl WatchSettings {
    /// Files the trickle sample may enqueue per tick; ticks run at roughly 10 Hz.
    pub fn per_tick_quota(&self) -> usize {
        ((self.max_files_per_second / 10) as usize).max(1)
    }
}

/// What a single notification asks of the crawler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchAction {
    Enqueue(PathBuf),
    Register(PathBuf),
}

/// Create/modify of an accepted regular file queues it; a new directory gets its
/// subtree registered. Deletions are left for the metadata pass to discover.
pub fn classify_event(event: &Event, filter: &ScanFilter) -> Vec<WatchAction> {
    let creates_dirs = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_))
    );
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
    ) {
        return Vec::new();
    }

    let mut actions = Vec::new();
    for path in &event.paths {
        if path.is_dir() {
            if creates_dirs && filter.should_descend(path) {
                actions.push(WatchAction::Register(path.clone()));
            }
        } else if path.is_file() && filter.accepts_file(path) {
            actions.push(WatchAction::Enqueue(path.clone()));
        }
    }
    actions
}

/// Subscribes `root` and every surviving directory below it, one level each.
/// With `collect_files`, also returns the accepted files already present below `root`:
/// anything written before the subscription existed raised no event.
fn register_tree(
    watcher: &SharedWatcher,
    root: &Path,
    filter: &ScanFilter,
    collect_files: bool,
) -> anyhow::Result<(usize, Vec<PathBuf>)> {
    let mut guard = watcher
        .lock()
        .map_err(|_| anyhow!("notification watcher lock poisoned"))?;
    let mut registered = 0;
    for dir in scanner::walk_dirs(root, filter) {
        match guard.watch(&dir, RecursiveMode::NonRecursive) {
            Ok(()) => registered += 1,
            Err(err) => debug!(dir = %dir.display(), error = %err, "cannot watch directory"),
        }
    }
    drop(guard);

    // Walked after subscribing, so a file is either seen here or raises an event.
    let files = if collect_files {
        scanner::walk(root, filter).map(|f| f.path).collect()
    } else {
        Vec::new()
    };
    Ok((registered, files))
}

async fn register_tree_blocking(
    watcher: &SharedWatcher,
    root: PathBuf,
    filter: &ScanFilter,
    collect_files: bool,
) -> Vec<PathBuf> {
    let watcher = watcher.clone();
    let filter = filter.clone();
    let shown = root.display().to_string();
    match task::spawn_blocking(move || register_tree(&watcher, &root, &filter, collect_files)).await {
        Ok(Ok((dirs, files))) => {
            debug!(root = %shown, dirs, files = files.len(), "registered for notifications");
            files
        }
        Ok(Err(err)) => {
            warn!(root = %shown, error = %err, "registration failed");
            Vec::new()
        }
        Err(err) => {
            warn!(root = %shown, error = %err, "registration task panicked");
            Vec::new()
        }
    }
}

async fn enqueue_paths(pool: &SqlitePool, paths: &mut Vec<String>) {
    if let Err(err) = queue::enqueue_many(pool, paths, TaskKind::MetadataScan, unix_now()).await {
        warn!(count = paths.len(), error = %err, "enqueue from watch failed");
    }
    paths.clear();
}

struct DrainJob {
    pool: SqlitePool,
    events: std_mpsc::Receiver<notify::Result<Event>>,
    watcher: SharedWatcher,
    filter: ScanFilter,
}

impl DrainJob {
    /// Fixed delay: the next tick is scheduled only after this one finished.
    async fn run(mut self, every: Duration, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            self.tick().await;
            if pause(every, &mut shutdown).await {
                break;
            }
        }
    }

    async fn tick(&mut self) {
        let mut actions = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(Ok(event)) => actions.extend(classify_event(&event, &self.filter)),
                Ok(Err(err)) => warn!(error = %err, "notification error"),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        let mut pending = Vec::new();
        for action in actions {
            let found = match action {
                WatchAction::Enqueue(path) => vec![path],
                WatchAction::Register(dir) => {
                    register_tree_blocking(&self.watcher, dir, &self.filter, true).await
                }
            };
            for path in found {
                pending.push(path.to_string_lossy().into_owned());
                if pending.len() >= DRAIN_FLUSH {
                    enqueue_paths(&self.pool, &mut pending).await;
                }
            }
        }
        if !pending.is_empty() {
            enqueue_paths(&self.pool, &mut pending).await;
        }
    }
}

struct TrickleJob {
    pool: SqlitePool,
    roots: Arc<Vec<PathBuf>>,
    cursors: Vec<usize>,
    quota: usize,
    filter: ScanFilter,
}

impl TrickleJob {
    async fn run(mut self, every: Duration, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            self.tick().await;
            if pause(every, &mut shutdown).await {
                break;
            }
        }
    }

    async fn tick(&mut self) {
        let roots = self.roots.clone();
        let cursors = std::mem::take(&mut self.cursors);
        let quota = self.quota;
        let filter = self.filter.clone();
        let sampled = task::spawn_blocking(move || {
            let mut cursors = cursors;
            let picked = sample_children(&roots, &mut cursors, quota, &filter);
            (picked, cursors)
        })
        .await;
        match sampled {
            Ok((picked, cursors)) => {
                self.cursors = cursors;
                let mut paths: Vec<String> = picked
                    .into_iter()
                    .map(|p| p.to_string_lossy().into_owned())
                    .collect();
                if !paths.is_empty() {
                    enqueue_paths(&self.pool, &mut paths).await;
                }
            }
            Err(err) => {
                warn!(error = %err, "trickle sample panicked");
                self.cursors = vec![0; self.roots.len()];
            }
        }
    }
}

/// Picks up to `quota` accepted regular files among the immediate children of the
/// roots. Each root keeps a cursor into its sorted listing so consecutive calls move
/// through the directory and wrap around. Symlinks are not followed.
pub fn sample_children(
    roots: &[PathBuf],
    cursors: &mut Vec<usize>,
    quota: usize,
    filter: &ScanFilter,
) -> Vec<PathBuf> {
    cursors.resize(roots.len(), 0);
    let mut picked = Vec::new();
    for (i, root) in roots.iter().enumerate() {
        if picked.len() >= quota {
            break;
        }
        let mut children: Vec<PathBuf> = match fs::read_dir(root) {
            Ok(rd) => rd.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(err) => {
                debug!(root = %root.display(), error = %err, "cannot list root");
                continue;
            }
        };
        if children.is_empty() {
            continue;
        }
        children.sort();

        let n = children.len();
        let start = cursors[i] % n;
        for step in 0..n {
            if picked.len() >= quota {
                break;
            }
            let idx = (start + step) % n;
            let child = &children[idx];
            let is_file = fs::symlink_metadata(child)
                .map(|m| m.file_type().is_file())
                .unwrap_or(false);
            if is_file && filter.accepts_file(child) {
                picked.push(child.clone());
                cursors[i] = idx + 1;
            }
        }
    }
    picked
}

struct Running {
    shutdown: watch::Sender<bool>,
    jobs: Vec<JoinHandle<()>>,
    watcher: SharedWatcher,
}

pub struct WatchCrawler {
    running: AsyncMutex<Option<Running>>,
}

impl WatchCrawler {
    /// Registers every root for notifications and starts both jobs.
    pub async fn start(
        pool: SqlitePool,
        roots: Vec<PathBuf>,
        settings: WatchSettings,
        filter: ScanFilter,
    ) -> anyhow::Result<Self> {
        let (tx, rx) = std_mpsc::channel();
        let watcher = RecommendedWatcher::new(tx, notify::Config::default())?;
        let watcher: SharedWatcher = Arc::new(Mutex::new(watcher));

        let mut watched = Vec::new();
        for root in roots {
            if !root.is_dir() {
                warn!(root = %root.display(), "skipping root that is not a directory");
                continue;
            }
            register_tree_blocking(&watcher, root.clone(), &filter, false).await;
            watched.push(root);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let drain = DrainJob {
            pool: pool.clone(),
            events: rx,
            watcher: watcher.clone(),
            filter: filter.clone(),
        };
        let roots = Arc::new(watched);
        let trickle = TrickleJob {
            pool,
            cursors: vec![0; roots.len()],
            roots: roots.clone(),
            quota: settings.per_tick_quota(),
            filter,
        };

        let drain_job = tokio::spawn(drain.run(settings.drain_interval, shutdown_rx.clone()));
        let trickle_job = tokio::spawn(trickle.run(settings.trickle_interval, shutdown_rx));

        info!(
            roots = roots.len(),
            per_tick = settings.per_tick_quota(),
            "watch crawler started"
        );
        Ok(Self {
            running: AsyncMutex::new(Some(Running {
                shutdown,
                jobs: vec![drain_job, trickle_job],
                watcher,
            })),
        })
    }

    /// Stops both jobs, waits for any tick in progress, and drops the notification
    /// subscription. Later calls do nothing.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        let _ = running.shutdown.send(true);
        for job in running.jobs {
            if let Err(err) = job.await {
                warn!(error = %err, "watch job ended abnormally");
            }
        }
        drop(running.watcher);
        info!("watch crawler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

impl Drop for WatchCrawler {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.shutdown.send(true);
        }
    }
}

/// Waits out the delay before the next run. True when shutdown was requested.
async fn pause(every: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(every) => *shutdown.borrow(),
    }
}

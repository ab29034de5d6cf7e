//! Drains due tasks from the queue in batches and routes them to the handlers.
//!
//! A batch is one transaction. Each task runs inside its own savepoint: a handler
//! error rolls back that task's writes and turns it into a backoff, while the rest of
//! the batch goes on. Only a failure in the queue bookkeeping aborts the batch.

use crate::config::Mode;
use crate::handlers::{self, HandlerOutcome};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::time::Duration;
use storage::{queue, unix_now, Task, TaskKind};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Fixed delay before a failed task is retried.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    pub batch_size: i64,
    /// Sleep after each task, to keep passive mode gentle on the machine.
    pub item_pacing: Option<Duration>,
    /// Sleep when nothing is due.
    pub idle_backoff: Duration,
    /// Postpone deep image scans instead of running them.
    pub defer_heavy: bool,
}

impl DispatchSettings {
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Passive => Self {
                batch_size: 5,
                item_pacing: Some(Duration::from_millis(100)),
                idle_backoff: Duration::from_millis(1500),
                defer_heavy: true,
            },
            Mode::Active => Self {
                batch_size: 50,
                item_pacing: None,
                idle_backoff: Duration::from_millis(100),
                defer_heavy: false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub fetched: usize,
    pub completed: usize,
    pub deferred: usize,
    pub retried: usize,
}

impl BatchOutcome {
    pub fn is_idle(&self) -> bool {
        self.fetched == 0
    }
}

pub struct Dispatcher {
    pool: SqlitePool,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(pool: SqlitePool, mode: Mode) -> Self {
        Self::with_settings(pool, DispatchSettings::for_mode(mode))
    }

    pub fn with_settings(pool: SqlitePool, settings: DispatchSettings) -> Self {
        Self { pool, settings }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// One quantum: fetch up to a batch of due tasks and settle each of them.
    /// Sleeps for the idle backoff when nothing is due.
    pub async fn run_once(&self) -> anyhow::Result<BatchOutcome> {
        let tasks = queue::dequeue_due(&self.pool, self.settings.batch_size, unix_now()).await?;
        let mut outcome = BatchOutcome {
            fetched: tasks.len(),
            ..Default::default()
        };
        if tasks.is_empty() {
            let dropped = queue::discard_unknown_kinds(&self.pool).await?;
            if dropped > 0 {
                warn!(dropped, "discarded queued tasks of unknown kind");
            }
            tokio::time::sleep(self.settings.idle_backoff).await;
            return Ok(outcome);
        }

        let mut tx = self.pool.begin().await?;
        for task in &tasks {
            let mut item = sqlx::Connection::begin(&mut *tx).await?;
            match self.handle(&mut item, task).await {
                Ok(HandlerOutcome::Completed) => {
                    queue::complete(&mut *item, task.id).await?;
                    item.commit().await?;
                    outcome.completed += 1;
                }
                Ok(HandlerOutcome::Deferred { until }) => {
                    queue::enqueue(&mut *item, &task.path, task.kind, until).await?;
                    item.commit().await?;
                    outcome.deferred += 1;
                }
                Err(err) => {
                    item.rollback().await?;
                    warn!(
                        path = %task.path,
                        kind = %task.kind,
                        attempts = task.attempts + 1,
                        error = %err,
                        "task failed, backing off"
                    );
                    queue::fail_and_backoff(&mut *tx, task.id, RETRY_BACKOFF).await?;
                    outcome.retried += 1;
                }
            }
            if let Some(pacing) = self.settings.item_pacing {
                tokio::time::sleep(pacing).await;
            }
        }
        tx.commit().await?;

        debug!(?outcome, "batch settled");
        Ok(outcome)
    }

    async fn handle(&self, conn: &mut SqliteConnection, task: &Task) -> anyhow::Result<HandlerOutcome> {
        match task.kind {
            TaskKind::MetadataScan => handlers::scan_metadata(conn, &task.path).await,
            TaskKind::DeepImageScan => {
                handlers::scan_image(conn, &task.path, self.settings.defer_heavy).await
            }
        }
    }

    /// Calls [`Dispatcher::run_once`] until `shutdown` flips to true. A batch that failed
    /// in its bookkeeping was rolled back and is picked up again after the idle backoff.
    /// Returns the number of quanta run.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> u64 {
        info!(
            batch_size = self.settings.batch_size,
            defer_heavy = self.settings.defer_heavy,
            "dispatcher started"
        );
        let mut quanta = 0u64;
        while !*shutdown.borrow() {
            quanta += 1;
            if let Err(err) = self.run_once().await {
                error!(error = %err, "batch rolled back");
                tokio::time::sleep(self.settings.idle_backoff).await;
            }
        }
        info!(quanta, "dispatcher stopped");
        quanta
    }

    /// Runs quanta until one finds nothing due.
    pub async fn drain(&self) -> anyhow::Result<BatchOutcome> {
        let mut total = BatchOutcome::default();
        loop {
            let batch = self.run_once().await?;
            if batch.is_idle() {
                return Ok(total);
            }
            total.fetched += batch.fetched;
            total.completed += batch.completed;
            total.deferred += batch.deferred;
            total.retried += batch.retried;
        }
    }
}

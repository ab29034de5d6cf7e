//! Composition root: builds the one storage handle and wires crawlers and dispatcher to it.

use anyhow::{Context, Result};
use indexer_core::config::{AppConfig, Mode};
use indexer_core::crawler::{BulkCrawler, CrawlSettings, CrawlSummary};
use indexer_core::dispatcher::{BatchOutcome, Dispatcher};
use indexer_core::scanner::ScanFilter;
use indexer_core::watch::{WatchCrawler, WatchSettings};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub mode: Mode,
    /// Present in active mode only.
    pub crawl: Option<CrawlSummary>,
    /// Totals of the dispatch quanta run before exit. Empty for a run stopped by Ctrl-C.
    pub dispatch: BatchOutcome,
    pub files: i64,
    pub pending: i64,
}

/// Runs the indexer until the queue is idle (`worker.once`) or until Ctrl-C.
pub async fn run(cfg: AppConfig) -> Result<RunSummary> {
    cfg.validate().context("invalid configuration")?;
    let roots = cfg.roots();
    let filter = ScanFilter::new(&cfg.scan.exclude).context("invalid exclude pattern")?;

    let pool = storage::connect(&cfg.database.path)
        .await
        .with_context(|| format!("opening database {}", cfg.database.path))?;
    storage::migrate(&pool).await?;

    let mode = cfg.worker.mode;
    info!(?mode, roots = roots.len(), once = cfg.worker.once, "indexer starting");

    let mut crawl = None;
    let mut watcher = None;
    match mode {
        Mode::Active => {
            let crawler = BulkCrawler::new(pool.clone(), CrawlSettings::from(&cfg.active), filter);
            crawl = Some(crawler.run(&roots).await?);
        }
        // The trickle keeps re-queuing root children, so a one-shot run settles what is
        // already due without watching.
        Mode::Passive if cfg.worker.once => {}
        Mode::Passive => {
            let settings = WatchSettings::from(&cfg.passive);
            watcher = Some(WatchCrawler::start(pool.clone(), roots, settings, filter).await?);
        }
    }

    let dispatcher = Dispatcher::new(pool.clone(), mode);
    let dispatch = if cfg.worker.once {
        dispatcher.drain().await?
    } else {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let signal = tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "cannot listen for Ctrl-C");
            }
            info!("shutdown requested");
            let _ = shutdown.send(true);
        });
        dispatcher.run(shutdown_rx).await;
        signal.abort();
        BatchOutcome::default()
    };

    if let Some(watcher) = watcher {
        watcher.stop().await;
    }

    let summary = RunSummary {
        mode,
        crawl,
        dispatch,
        files: storage::files::count_files(&pool).await?,
        pending: storage::queue::pending_count(&pool).await?,
    };
    pool.close().await;
    Ok(summary)
}

pub fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    if let Some(crawl) = &summary.crawl {
        println!(
            "crawl: {} root(s), discovered {}, enqueued {}",
            crawl.roots, crawl.discovered, crawl.enqueued
        );
    }
    println!(
        "dispatch: completed {}, deferred {}, retried {}; {} file(s) indexed, {} task(s) pending",
        summary.dispatch.completed,
        summary.dispatch.deferred,
        summary.dispatch.retried,
        summary.files,
        summary.pending
    );
    Ok(())
}

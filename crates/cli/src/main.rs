use anyhow::Result;
use clap::Parser;
use cli::app;
use indexer_core::config::{self, Mode};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;

    // Flags win over file and environment.
    if let Some(db) = cli.db {
        cfg.database.path = db;
    }
    if !cli.root.is_empty() {
        cfg.scan.roots = cli.root;
    }
    if cli.active {
        cfg.worker.mode = Mode::Active;
    } else if cli.passive {
        cfg.worker.mode = Mode::Passive;
    }
    if cli.once {
        cfg.worker.once = true;
    }
    if let Some(threads) = cli.threads {
        cfg.active.threads = threads;
    }
    if let Some(rate) = cli.max_files_per_second {
        cfg.passive.max_files_per_second = rate;
    }

    let summary = app::run(cfg).await?;
    app::print_summary(&summary, cli.json)
}

#[derive(Parser)]
#[command(name = "fs-indexer")]
#[command(about = "Durable task-queue filesystem indexer", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    /// Override the SQLite database path
    #[arg(long)]
    db: Option<String>,

    /// Root directory to index; repeat for several
    #[arg(long)]
    root: Vec<String>,

    /// Exhaustive crawl, then dispatch without pacing
    #[arg(long, conflicts_with = "passive")]
    active: bool,

    /// Watch the roots and dispatch gently, postponing deep scans
    #[arg(long)]
    passive: bool,

    /// Exit once nothing is due instead of waiting for Ctrl-C
    #[arg(long)]
    once: bool,

    /// Walker threads for the active crawl
    #[arg(long)]
    threads: Option<usize>,

    /// Trickle sampling budget in passive mode
    #[arg(long)]
    max_files_per_second: Option<u32>,

    /// Output JSON summary
    #[arg(long)]
    json: bool,
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scan: ScanPaths,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub active: ActiveConfig,
    #[serde(default)]
    pub passive: PassiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanPaths {
    #[serde(default)]
    pub roots: Vec<String>,
    /// Extra glob patterns pruned on top of the built-in noise directories.
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Active,
    #[default]
    Passive,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub once: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveConfig {
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ActiveConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            queue_capacity: default_queue_capacity(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassiveConfig {
    #[serde(default = "default_max_files_per_second")]
    pub max_files_per_second: u32,
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
    #[serde(default = "default_trickle_interval_ms")]
    pub trickle_interval_ms: u64,
}

impl Default for PassiveConfig {
    fn default() -> Self {
        Self {
            max_files_per_second: default_max_files_per_second(),
            drain_interval_ms: default_drain_interval_ms(),
            trickle_interval_ms: default_trickle_interval_ms(),
        }
    }
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .max(2)
}

fn default_queue_capacity() -> usize {
    8192
}

fn default_batch_size() -> usize {
    800
}

fn default_max_files_per_second() -> u32 {
    50
}

fn default_drain_interval_ms() -> u64 {
    250
}

fn default_trickle_interval_ms() -> u64 {
    100
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("scan root does not exist: {}", .0.display())]
    MissingRoot(PathBuf),
    #[error("scan root is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl AppConfig {
    pub fn roots(&self) -> Vec<PathBuf> {
        self.scan.roots.iter().map(PathBuf::from).collect()
    }

    /// Rejects settings the crawlers cannot run with. Any error here is fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for root in self.roots() {
            if !root.exists() {
                return Err(ConfigError::MissingRoot(root));
            }
            if !root.is_dir() {
                return Err(ConfigError::NotADirectory(root));
            }
        }
        if self.active.threads == 0 {
            return Err(ConfigError::Zero("active.threads"));
        }
        if self.active.queue_capacity == 0 {
            return Err(ConfigError::Zero("active.queue_capacity"));
        }
        if self.active.batch_size == 0 {
            return Err(ConfigError::Zero("active.batch_size"));
        }
        if self.passive.max_files_per_second == 0 {
            return Err(ConfigError::Zero("passive.max_files_per_second"));
        }
        Ok(())
    }
}

/// Layered load: built-in defaults, then the TOML file, then `FSINDEX__SECTION__KEY` env vars.
pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder().set_default("database.path", "data/app.db")?;
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("FSINDEX")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("scan.roots")
            .with_list_parse_key("scan.exclude")
            .try_parsing(true),
    );
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("indexer.toml");
        fs::write(
            &file,
            r#"
            [database]
            path = "/tmp/x.db"
            [scan]
            roots = ["/srv/photos"]
            [worker]
            mode = "active"
            [passive]
            max_files_per_second = 20
            "#,
        )
        .unwrap();

        let cfg = load(Some(&file.to_string_lossy())).unwrap();
        assert_eq!(cfg.database.path, "/tmp/x.db");
        assert_eq!(cfg.scan.roots, vec!["/srv/photos".to_string()]);
        assert_eq!(cfg.worker.mode, Mode::Active);
        assert!(!cfg.worker.once);
        assert_eq!(cfg.passive.max_files_per_second, 20);
        assert_eq!(cfg.passive.trickle_interval_ms, 100);
        assert_eq!(cfg.active.queue_capacity, 8192);
        assert_eq!(cfg.active.batch_size, 800);
    }

    #[test]
    fn validate_rejects_bad_roots_and_zero_budgets() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, "x").unwrap();

        let mut cfg = AppConfig {
            database: DatabaseConfig {
                path: "unused".to_string(),
            },
            scan: ScanPaths {
                roots: vec![dir.path().to_string_lossy().into_owned()],
                exclude: vec![],
            },
            worker: WorkerConfig::default(),
            active: ActiveConfig::default(),
            passive: PassiveConfig::default(),
        };
        assert_eq!(cfg.validate(), Ok(()));

        cfg.passive.max_files_per_second = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::Zero("passive.max_files_per_second"))
        );
        cfg.passive.max_files_per_second = 10;

        cfg.scan.roots.push(file.to_string_lossy().into_owned());
        assert_eq!(cfg.validate(), Err(ConfigError::NotADirectory(file.clone())));

        cfg.scan.roots = vec![dir.path().join("nope").to_string_lossy().into_owned()];
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingRoot(_))));
    }
}

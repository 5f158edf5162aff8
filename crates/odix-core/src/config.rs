//! Persistent configuration for odix.
//!
//! Loads a TOML config (default `~/.odix/config.toml`), then applies
//! environment overrides (`ODOO_PATH`, `SQLITE_DB_PATH`, `LOG_LEVEL`,
//! `MAX_CONCURRENT_MODULES`, `MAX_WORKER_PROCESSES`, `PARSE_TIMEOUT_SECS`),
//! with a `.env` file in the working directory loaded first.

use crate::OdixError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level odix configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OdixConfig {
    /// Root of the Odoo codebase (one or more addons directories below it).
    pub odoo_path: Option<PathBuf>,
    /// `tracing` filter directive for the `odix` target.
    pub log_level: String,
    pub indexing: IndexingConfig,
    pub storage: StorageConfig,
}

impl Default for OdixConfig {
    fn default() -> Self {
        Self {
            odoo_path: None,
            log_level: "info".to_string(),
            indexing: IndexingConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl OdixConfig {
    /// Load configuration from the given path.
    pub fn load(path: &Path) -> Result<Self, OdixError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| OdixError::Config(e.to_string()))
    }

    /// Save configuration to the given path.
    pub fn save(&self, path: &Path) -> Result<(), OdixError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| OdixError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `path` (or the default path), falling back to defaults
    /// when the file doesn't exist, then apply `.env` and process
    /// environment overrides.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self, OdixError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            Self::default()
        };

        // A missing .env file is the normal case.
        let _ = dotenvy::dotenv();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), OdixError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("ODOO_PATH").filter(|v| !v.is_empty()) {
            self.odoo_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("SQLITE_DB_PATH").filter(|v| !v.is_empty()) {
            self.storage.db_path = path;
        }
        if let Some(level) = lookup("LOG_LEVEL").filter(|v| !v.is_empty()) {
            self.log_level = level.to_lowercase();
        }
        if let Some(v) = lookup("MAX_CONCURRENT_MODULES") {
            self.indexing.max_concurrent_modules = parse_number("MAX_CONCURRENT_MODULES", &v)?;
        }
        if let Some(v) = lookup("MAX_WORKER_PROCESSES") {
            self.indexing.max_worker_processes = parse_number("MAX_WORKER_PROCESSES", &v)?;
        }
        if let Some(v) = lookup("PARSE_TIMEOUT_SECS") {
            self.indexing.parse_timeout_secs = parse_number("PARSE_TIMEOUT_SECS", &v)? as u64;
        }
        Ok(())
    }

    /// Check everything the indexing core needs before it starts.
    pub fn validate(&self) -> Result<(), OdixError> {
        let root = self.codebase_root()?;
        if !root.is_dir() {
            return Err(OdixError::Config(format!(
                "ODOO_PATH must exist and be a directory: {}",
                root.display()
            )));
        }
        if self.indexing.max_concurrent_modules == 0 {
            return Err(OdixError::Config(
                "max_concurrent_modules must be at least 1".to_string(),
            ));
        }
        if self.indexing.parse_timeout_secs == 0 {
            return Err(OdixError::Config(
                "parse_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn codebase_root(&self) -> Result<&Path, OdixError> {
        self.odoo_path.as_deref().ok_or_else(|| {
            OdixError::Config(
                "ODOO_PATH must be set (config file, environment, or .env)".to_string(),
            )
        })
    }

    /// Default config path: `~/.odix/config.toml`.
    pub fn default_path() -> PathBuf {
        odix_home().join("config.toml")
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize, OdixError> {
    value
        .trim()
        .parse()
        .map_err(|_| OdixError::Config(format!("{key} must be a non-negative integer, got {value:?}")))
}

fn odix_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".odix")
}

/// Indexing run limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Modules extracted concurrently.
    pub max_concurrent_modules: usize,
    /// Files extracted concurrently; 0 means available parallelism.
    pub max_worker_processes: usize,
    /// Per-file extraction timeout.
    pub parse_timeout_secs: u64,
    /// Files larger than this are skipped and reported as run failures.
    pub max_file_size_bytes: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_modules: 4,
            max_worker_processes: 0,
            parse_timeout_secs: 30,
            max_file_size_bytes: 8 * 1024 * 1024,
        }
    }
}

impl IndexingConfig {
    pub fn worker_count(&self) -> usize {
        if self.max_worker_processes == 0 {
            num_cpus::get().max(1)
        } else {
            self.max_worker_processes
        }
    }

    pub fn parse_timeout(&self) -> Duration {
        Duration::from_secs(self.parse_timeout_secs)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    pub db_path: String,
    /// SQLite cache size in MB.
    pub cache_size_mb: u32,
    /// SQLite busy timeout in seconds.
    pub busy_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: odix_home()
                .join("odoo_index.db")
                .to_string_lossy()
                .into_owned(),
            cache_size_mb: 64,
            busy_timeout_secs: 5,
        }
    }
}

//! Configuration loading for dbsync.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `~/.config/dbsync/config.toml`.

use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::SyncTypesError;

/// SQL dialect used to generate trigger code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SqlDialectKind {
    #[default]
    Mysql,
    Postgres,
}

impl std::str::FromStr for SqlDialectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(SqlDialectKind::Mysql),
            "postgres" | "postgresql" => Ok(SqlDialectKind::Postgres),
            other => Err(format!("unknown SQL dialect: {}", other)),
        }
    }
}

/// What to do with triggers and log tables at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerCreationStrategy {
    /// Create missing objects, tolerating "already exists" failures
    #[default]
    Create,
    /// Drop every object first, then create
    DropCreate,
    /// Leave the schema alone
    None,
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub dialect: SqlDialectKind,

    /// Prefix for generated procedures, sequences and triggers
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,

    #[serde(default)]
    pub trigger_strategy: TriggerCreationStrategy,

    /// Fixed delay between two poller ticks
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of change events handed to consumers at once
    #[serde(default = "default_delivery_batch_size")]
    pub delivery_batch_size: usize,

    /// Number of log rows fetched per database page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Page size for the embedded-entity lookup query
    #[serde(default = "default_cascade_page_size")]
    pub cascade_page_size: usize,

    /// Path to the Tantivy index directory
    #[serde(default = "default_index_path")]
    pub index_path: String,

    /// Memory budget for the index writer in MB
    #[serde(default = "default_writer_memory_mb")]
    pub writer_memory_mb: usize,

    /// Event model declaration file (TOML or JSON)
    #[serde(default)]
    pub model_path: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_table_prefix() -> String {
    "dbsync_".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_delivery_batch_size() -> usize {
    5
}

fn default_page_size() -> usize {
    100
}

fn default_cascade_page_size() -> usize {
    100
}

fn default_index_path() -> String {
    ProjectDirs::from("", "", "dbsync")
        .map(|p| p.data_local_dir().join("index"))
        .unwrap_or_else(|| PathBuf::from("./dbsync-index"))
        .to_string_lossy()
        .to_string()
}

fn default_writer_memory_mb() -> usize {
    50
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            dialect: SqlDialectKind::default(),
            table_prefix: default_table_prefix(),
            trigger_strategy: TriggerCreationStrategy::default(),
            poll_interval_ms: default_poll_interval_ms(),
            delivery_batch_size: default_delivery_batch_size(),
            page_size: default_page_size(),
            cascade_page_size: default_cascade_page_size(),
            index_path: default_index_path(),
            writer_memory_mb: default_writer_memory_mb(),
            model_path: None,
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/dbsync/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (DBSYNC_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, SyncTypesError> {
        let config_dir = ProjectDirs::from("", "", "dbsync")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())
            .map_err(|e| SyncTypesError::Config(e.to_string()))?
            .set_default("table_prefix", default_table_prefix())
            .map_err(|e| SyncTypesError::Config(e.to_string()))?
            .set_default("poll_interval_ms", default_poll_interval_ms() as i64)
            .map_err(|e| SyncTypesError::Config(e.to_string()))?
            .set_default("delivery_batch_size", default_delivery_batch_size() as i64)
            .map_err(|e| SyncTypesError::Config(e.to_string()))?
            .set_default("page_size", default_page_size() as i64)
            .map_err(|e| SyncTypesError::Config(e.to_string()))?
            .set_default("cascade_page_size", default_cascade_page_size() as i64)
            .map_err(|e| SyncTypesError::Config(e.to_string()))?
            .set_default("index_path", default_index_path())
            .map_err(|e| SyncTypesError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // DBSYNC_POLL_INTERVAL_MS, DBSYNC_DIALECT, ...
        builder = builder.add_source(
            Environment::with_prefix("DBSYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| SyncTypesError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| SyncTypesError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the poller cannot run with.
    pub fn validate(&self) -> Result<(), SyncTypesError> {
        if self.poll_interval_ms == 0 {
            return Err(SyncTypesError::Config(
                "poll_interval_ms must be > 0".to_string(),
            ));
        }
        if self.delivery_batch_size == 0 {
            return Err(SyncTypesError::Config(
                "delivery_batch_size must be > 0".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(SyncTypesError::Config("page_size must be > 0".to_string()));
        }
        if self.cascade_page_size == 0 {
            return Err(SyncTypesError::Config(
                "cascade_page_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    /// Expand ~ in index_path to the home directory
    pub fn expanded_index_path(&self) -> PathBuf {
        if let Some(rest) = self.index_path.strip_prefix("~/") {
            if let Some(home) = directories::BaseDirs::new().map(|b| b.home_dir().to_path_buf()) {
                return home.join(rest);
            }
        }
        PathBuf::from(&self.index_path)
    }
}

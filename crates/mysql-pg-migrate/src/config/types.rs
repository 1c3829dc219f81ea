//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of tables copied concurrently.
pub const DEFAULT_PARALLELISM: usize = 10;

/// Default number of rows requested from the source per blocking fetch.
pub const DEFAULT_FETCH_PAGE_SIZE: usize = 500;

/// Default number of rows between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 50_000;

/// Default number of rows buffered before a COPY chunk is flushed.
pub const DEFAULT_COPY_FLUSH_ROWS: usize = 10_000;

/// Default `application_name` reported to PostgreSQL.
pub const DEFAULT_APPLICATION_NAME: &str = "mysql-pg-migrate";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (MySQL).
    #[serde(default)]
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL).
    #[serde(default)]
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source database (MySQL) configuration.
///
/// Every field is optional; an unset field falls back to the driver default.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    #[serde(default)]
    pub host: Option<String>,

    /// Database port.
    #[serde(default)]
    pub port: Option<u16>,

    /// Database name.
    #[serde(default)]
    pub database: Option<String>,

    /// Username.
    #[serde(default)]
    pub user: Option<String>,

    /// Password (never serialized).
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    #[serde(default)]
    pub host: Option<String>,

    /// Database port.
    #[serde(default)]
    pub port: Option<u16>,

    /// Database name.
    #[serde(default)]
    pub database: Option<String>,

    /// Username.
    #[serde(default)]
    pub user: Option<String>,

    /// Password (never serialized).
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// `search_path` for the migration sessions.
    #[serde(default)]
    pub search_path: Option<String>,

    /// `application_name` for the migration sessions.
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            database: None,
            user: None,
            password: None,
            search_path: None,
            application_name: default_application_name(),
        }
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("search_path", &self.search_path)
            .field("application_name", &self.application_name)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Number of tables copied concurrently; also the size of both pools.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Rows per blocking page fetch from the source.
    #[serde(default = "default_fetch_page_size")]
    pub fetch_page_size: usize,

    /// Rows between progress log lines.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Rows buffered before a COPY chunk is sent.
    #[serde(default = "default_copy_flush_rows")]
    pub copy_flush_rows: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            fetch_page_size: DEFAULT_FETCH_PAGE_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            copy_flush_rows: DEFAULT_COPY_FLUSH_ROWS,
        }
    }
}

fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

fn default_fetch_page_size() -> usize {
    DEFAULT_FETCH_PAGE_SIZE
}

fn default_progress_interval() -> u64 {
    DEFAULT_PROGRESS_INTERVAL
}

fn default_copy_flush_rows() -> usize {
    DEFAULT_COPY_FLUSH_ROWS
}

fn default_application_name() -> String {
    DEFAULT_APPLICATION_NAME.to_string()
}

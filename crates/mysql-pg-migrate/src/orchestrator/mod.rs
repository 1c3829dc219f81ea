//! Migration orchestrator: resolves the table set, clears the destination
//! and copies every table under bounded parallelism.

use crate::config::{Config, MigrationConfig};
use crate::error::Result;
use crate::parallel::{run_all, Throttle};
use crate::source::{BlockingConnection, BlockingPool, MysqlConnection, MysqlDriver};
use crate::target::{PgPool, TargetConnection, TargetPool};
use crate::transfer::{copy_table, CopyOptions, TableReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Total tables processed.
    pub tables_total: usize,

    /// Total rows transferred.
    pub rows_transferred: u64,

    /// Average throughput (rows/second).
    pub rows_per_second: u64,

    /// Sequences moved past the copied data.
    pub sequences_reset: usize,

    /// Sequence lookups or resets that failed.
    pub sequences_failed: usize,

    /// Per-table outcomes in table-list order.
    pub tables: Vec<TableReport>,
}

impl MigrationResult {
    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Migration orchestrator.
pub struct Migrator<C: BlockingConnection, T: TargetPool> {
    source: Arc<BlockingPool<C>>,
    target: Arc<T>,
    config: MigrationConfig,
}

impl Migrator<MysqlConnection, PgPool> {
    /// Open both pools from configuration.
    ///
    /// The source pool connects lazily; the target pool is probed here so a
    /// bad destination fails before any work starts.
    pub async fn connect(config: &Config) -> Result<Self> {
        let parallelism = config.migration.parallelism;
        let source = BlockingPool::new(
            MysqlDriver::new(&config.source),
            parallelism,
            config.migration.fetch_page_size,
        );
        let target = PgPool::new(&config.target, parallelism, config.migration.copy_flush_rows).await?;
        Ok(Self::new(source, target, config.migration.clone()))
    }
}

impl<C: BlockingConnection, T: TargetPool> Migrator<C, T> {
    pub fn new(source: BlockingPool<C>, target: T, config: MigrationConfig) -> Self {
        Self {
            source: Arc::new(source),
            target: Arc::new(target),
            config,
        }
    }

    /// Run the migration and close both pools.
    ///
    /// `tables` restricts the run to the given names; `None` copies every
    /// table in the source database. Cancelling `cancel` stops the run.
    pub async fn run(self, tables: Option<Vec<String>>, cancel: CancellationToken) -> Result<MigrationResult> {
        let result = self.run_tables(tables, &cancel).await;
        self.source.close().await;
        self.target.close().await;
        result
    }

    async fn run_tables(&self, tables: Option<Vec<String>>, cancel: &CancellationToken) -> Result<MigrationResult> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let timer = Instant::now();
        info!("Starting migration run: {}", run_id);

        let tables = match tables {
            Some(tables) => dedup(tables),
            None => self.discover_tables().await?,
        };

        let reports = if tables.is_empty() {
            info!("No tables to copy");
            Vec::new()
        } else {
            self.truncate(&tables).await?;
            self.copy_all(&tables, cancel).await?
        };

        let duration = timer.elapsed().as_secs_f64();
        let rows_transferred: u64 = reports.iter().map(|r| r.rows).sum();
        let rows_per_second = if duration > 0.0 {
            (rows_transferred as f64 / duration) as u64
        } else {
            0
        };
        info!(
            "Migration completed: {} tables, {} rows in {:.2}s ({} rows/sec)",
            tables.len(),
            rows_transferred,
            duration,
            rows_per_second
        );

        Ok(MigrationResult {
            run_id,
            status: "completed".to_string(),
            duration_seconds: duration,
            started_at,
            completed_at: Utc::now(),
            tables_total: tables.len(),
            rows_transferred,
            rows_per_second,
            sequences_reset: reports.iter().map(|r| r.sequences_reset).sum(),
            sequences_failed: reports.iter().map(|r| r.sequences_failed).sum(),
            tables: reports,
        })
    }

    async fn discover_tables(&self) -> Result<Vec<String>> {
        let mut conn = self.source.acquire().await?;
        let tables = conn.list_tables().await;
        conn.release();
        let tables = tables?;
        info!("Found {} tables", tables.len());
        Ok(tables)
    }

    async fn truncate(&self, tables: &[String]) -> Result<()> {
        info!("Truncating {} tables", tables.len());
        let mut conn = self.target.acquire().await?;
        conn.truncate(tables).await
    }

    async fn copy_all(&self, tables: &[String], cancel: &CancellationToken) -> Result<Vec<TableReport>> {
        let throttle = Throttle::new(self.config.parallelism);
        let options = CopyOptions {
            progress_interval: self.config.progress_interval,
        };

        let ops = tables.iter().map(|table| {
            let source = self.source.clone();
            let target = self.target.clone();
            let throttle = throttle.clone();
            let options = options.clone();
            let table = table.clone();
            move |cancel: CancellationToken| async move {
                throttle
                    .run(&cancel, copy_table(&source, target.as_ref(), &table, &options, &cancel))
                    .await
            }
        });
        run_all(cancel, ops).await
    }
}

/// Drop repeated names, keeping first occurrences in order.
fn dedup(tables: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tables.into_iter().filter(|t| seen.insert(t.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_keeps_order() {
        let tables = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(dedup(tables), vec!["b", "a"]);
    }

    #[test]
    fn test_result_to_json() {
        let now = Utc::now();
        let result = MigrationResult {
            run_id: "run".into(),
            status: "completed".into(),
            duration_seconds: 1.5,
            started_at: now,
            completed_at: now,
            tables_total: 1,
            rows_transferred: 3,
            rows_per_second: 2,
            sequences_reset: 1,
            sequences_failed: 0,
            tables: vec![TableReport {
                table: "users".into(),
                rows: 3,
                elapsed_seconds: 1.0,
                sequences_reset: 1,
                sequences_failed: 0,
            }],
        };
        let json = result.to_json().unwrap();
        assert!(json.contains("\"rows_transferred\": 3"));
        assert!(json.contains("\"table\": \"users\""));
    }
}

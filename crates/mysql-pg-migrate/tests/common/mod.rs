//! In-memory source and destination used by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use mysql_pg_migrate::error::{MigrateError, Result};
use mysql_pg_migrate::source::{BlockingConnection, BlockingCursor, BlockingDriver, Column};
use mysql_pg_migrate::target::{RowStream, SequenceDescriptor, TargetConnection, TargetPool};
use mysql_pg_migrate::typemap::ColumnType;
use mysql_pg_migrate::{BlockingPool, MigrationConfig, Migrator, Row, SqlValue};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Tracks a current count and its high-water mark.
#[derive(Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Source
// =============================================================================

#[derive(Clone)]
pub struct SourceTable {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

#[derive(Default)]
pub struct SourceState {
    pub tables: Mutex<Vec<(String, SourceTable)>>,
    pub page_delay: Mutex<Duration>,
    /// Per-row cost of reading an abandoned result set to its end on drop.
    pub drain_delay: Mutex<Duration>,
    pub aborts: AtomicUsize,
    pub failing_tables: Mutex<HashSet<String>>,
    pub connections: Gauge,
    pub cursors: Gauge,
    pub pages_fetched: AtomicUsize,
}

impl SourceState {
    pub fn add_table(&self, name: &str, columns: &[&str], rows: Vec<Row>) {
        self.tables.lock().unwrap().push((
            name.to_string(),
            SourceTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
            },
        ));
    }

    pub fn set_page_delay(&self, delay: Duration) {
        *self.page_delay.lock().unwrap() = delay;
    }

    pub fn set_drain_delay(&self, delay: Duration) {
        *self.drain_delay.lock().unwrap() = delay;
    }

    pub fn fail_fetch(&self, table: &str) {
        self.failing_tables.lock().unwrap().insert(table.to_string());
    }

    fn table(&self, name: &str) -> Option<SourceTable> {
        self.tables
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.clone())
    }
}

pub struct FakeDriver {
    pub state: Arc<SourceState>,
}

impl BlockingDriver for FakeDriver {
    type Connection = FakeSourceConnection;

    fn connect(&self) -> Result<FakeSourceConnection> {
        self.state.connections.enter();
        Ok(FakeSourceConnection {
            state: self.state.clone(),
        })
    }

    fn name(&self) -> &str {
        "fake-mysql"
    }
}

pub struct FakeSourceConnection {
    state: Arc<SourceState>,
}

impl BlockingConnection for FakeSourceConnection {
    type Cursor<'c> = FakeCursor;

    fn list_tables(&mut self) -> Result<Vec<String>> {
        Ok(self
            .state
            .tables
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn describe_columns(&mut self, table: &str) -> Result<Vec<Column>> {
        let columns = self.state.table(table).map(|t| t.columns).unwrap_or_default();
        Ok(columns
            .into_iter()
            .enumerate()
            .map(|(i, name)| Column {
                name,
                ordinal: i as u32 + 1,
            })
            .collect())
    }

    fn open_cursor(&mut self, table: &str, columns: &[String]) -> Result<FakeCursor> {
        let source = self
            .state
            .table(table)
            .ok_or_else(|| MigrateError::SourceQuery(format!("Table '{}' doesn't exist", table)))?;
        let indexes: Vec<usize> = columns
            .iter()
            .map(|c| source.columns.iter().position(|s| s == c).unwrap())
            .collect();
        let rows = source
            .rows
            .into_iter()
            .map(|row| indexes.iter().map(|&i| row[i].clone()).collect())
            .collect::<Vec<Row>>();
        let fail = self.state.failing_tables.lock().unwrap().contains(table);
        self.state.cursors.enter();
        Ok(FakeCursor {
            state: self.state.clone(),
            rows: rows.into_iter(),
            fail,
            aborted: false,
        })
    }

    fn close(self) -> Result<()> {
        self.state.connections.exit();
        Ok(())
    }
}

pub struct FakeCursor {
    state: Arc<SourceState>,
    rows: std::vec::IntoIter<Row>,
    fail: bool,
    aborted: bool,
}

impl BlockingCursor for FakeCursor {
    fn fetch_page(&mut self, size: usize) -> Result<Vec<Row>> {
        let delay = *self.state.page_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.state.pages_fetched.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MigrateError::SourceQuery("Lost connection to MySQL server during query".into()));
        }
        Ok(self.rows.by_ref().take(size).collect())
    }

    fn abort(&mut self) -> Result<()> {
        self.aborted = true;
        self.state.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for FakeCursor {
    fn drop(&mut self) {
        // Like the MySQL client, an unfinished result set is read to the end
        // unless the statement was interrupted.
        let delay = *self.state.drain_delay.lock().unwrap();
        if !self.aborted && !delay.is_zero() {
            for _ in self.rows.by_ref() {
                std::thread::sleep(delay);
            }
        }
        self.state.cursors.exit();
    }
}

// =============================================================================
// Target
// =============================================================================

#[derive(Clone, Default)]
pub struct TargetTable {
    pub columns: Vec<(String, ColumnType)>,
    pub rows: Vec<Row>,
    /// (column, sequence name, next value)
    pub sequences: Vec<(String, String, i64)>,
}

#[derive(Default)]
pub struct TargetState {
    pub tables: Mutex<HashMap<String, TargetTable>>,
    pub truncations: Mutex<Vec<Vec<String>>>,
    pub copy_delay: Mutex<Duration>,
    pub fail_sequence_reset: Mutex<bool>,
    pub fail_sequence_lookup: Mutex<bool>,
    pub copies: Gauge,
    pub closed: Mutex<bool>,
}

impl TargetState {
    pub fn add_table(&self, name: &str, columns: &[(&str, &str)]) {
        let columns = columns
            .iter()
            .map(|(c, t)| (c.to_string(), ColumnType::new("pg_catalog", *t)))
            .collect();
        self.tables.lock().unwrap().insert(
            name.to_string(),
            TargetTable {
                columns,
                ..TargetTable::default()
            },
        );
    }

    pub fn add_sequence(&self, table: &str, column: &str, sequence: &str) {
        let mut tables = self.tables.lock().unwrap();
        let entry = tables.get_mut(table).unwrap();
        entry.sequences.push((column.to_string(), sequence.to_string(), 1));
    }

    pub fn insert_rows(&self, table: &str, rows: Vec<Row>) {
        self.tables.lock().unwrap().get_mut(table).unwrap().rows.extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.lock().unwrap()[table].rows.clone()
    }

    pub fn next_value(&self, table: &str, sequence: &str) -> i64 {
        self.tables.lock().unwrap()[table]
            .sequences
            .iter()
            .find(|(_, s, _)| s == sequence)
            .map(|(_, _, next)| *next)
            .unwrap()
    }
}

pub struct FakeTarget {
    pub state: Arc<TargetState>,
}

#[async_trait]
impl TargetPool for FakeTarget {
    type Connection = FakeTargetConnection;

    async fn acquire(&self) -> Result<FakeTargetConnection> {
        Ok(FakeTargetConnection {
            state: self.state.clone(),
        })
    }

    async fn close(&self) {
        *self.state.closed.lock().unwrap() = true;
    }
}

pub struct FakeTargetConnection {
    state: Arc<TargetState>,
}

struct CopyGuard<'a>(&'a Gauge);

impl Drop for CopyGuard<'_> {
    fn drop(&mut self) {
        self.0.exit();
    }
}

#[async_trait]
impl TargetConnection for FakeTargetConnection {
    async fn truncate(&mut self, tables: &[String]) -> Result<()> {
        let mut all = self.state.tables.lock().unwrap();
        for table in tables {
            all.get_mut(table)
                .ok_or_else(|| MigrateError::SourceQuery(format!("relation \"{}\" does not exist", table)))?
                .rows
                .clear();
        }
        self.state.truncations.lock().unwrap().push(tables.to_vec());
        Ok(())
    }

    async fn column_types(&mut self, table: &str, columns: &[String]) -> Result<Vec<ColumnType>> {
        let tables = self.state.tables.lock().unwrap();
        let target = tables
            .get(table)
            .ok_or_else(|| MigrateError::SourceQuery(format!("relation \"{}\" does not exist", table)))?;
        Ok(columns
            .iter()
            .filter_map(|c| target.columns.iter().find(|(name, _)| name == c).map(|(_, t)| t.clone()))
            .collect())
    }

    async fn copy_rows(&mut self, table: &str, _columns: &[String], mut rows: RowStream<'_>) -> Result<u64> {
        self.state.copies.enter();
        let _guard = CopyGuard(&self.state.copies);

        let delay = *self.state.copy_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut loaded = Vec::new();
        while let Some(row) = rows.next().await {
            loaded.push(row?);
        }
        let count = loaded.len() as u64;
        self.state
            .tables
            .lock()
            .unwrap()
            .get_mut(table)
            .unwrap()
            .rows
            .extend(loaded);
        Ok(count)
    }

    async fn owned_sequences(&mut self, table: &str) -> Result<Vec<SequenceDescriptor>> {
        if *self.state.fail_sequence_lookup.lock().unwrap() {
            return Err(MigrateError::SourceQuery(format!(
                "permission denied for table {}",
                table
            )));
        }
        Ok(self.state.tables.lock().unwrap()[table]
            .sequences
            .iter()
            .map(|(column, sequence, _)| SequenceDescriptor {
                column: column.clone(),
                sequence: sequence.clone(),
            })
            .collect())
    }

    async fn reset_sequence(&mut self, table: &str, sequence: &SequenceDescriptor) -> Result<i64> {
        if *self.state.fail_sequence_reset.lock().unwrap() {
            return Err(MigrateError::SourceQuery(format!(
                "permission denied for sequence {}",
                sequence.sequence
            )));
        }
        let mut tables = self.state.tables.lock().unwrap();
        let target = tables.get_mut(table).unwrap();
        let index = target
            .columns
            .iter()
            .position(|(name, _)| *name == sequence.column)
            .unwrap();
        let max = target
            .rows
            .iter()
            .filter_map(|row| match row[index] {
                SqlValue::Int(n) => Some(n),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        let next = max + 1;
        for entry in target.sequences.iter_mut() {
            if entry.1 == sequence.sequence {
                entry.2 = next;
            }
        }
        Ok(next)
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub source: Arc<SourceState>,
    pub target: Arc<TargetState>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            source: Arc::new(SourceState::default()),
            target: Arc::new(TargetState::default()),
        }
    }

    pub fn migrator(&self, parallelism: usize, page_size: usize) -> Migrator<FakeSourceConnection, FakeTarget> {
        let pool = BlockingPool::new(
            FakeDriver {
                state: self.source.clone(),
            },
            parallelism,
            page_size,
        );
        let target = FakeTarget {
            state: self.target.clone(),
        };
        let config = MigrationConfig {
            parallelism,
            fetch_page_size: page_size,
            progress_interval: 1_000,
            copy_flush_rows: 100,
        };
        Migrator::new(pool, target, config)
    }
}

/// `n` rows of `(id, label)` with ids starting at 1.
pub fn numbered_rows(n: i64) -> Vec<Row> {
    (1..=n)
        .map(|i| vec![SqlValue::Int(i), SqlValue::Text(format!("row {}", i))])
        .collect()
}

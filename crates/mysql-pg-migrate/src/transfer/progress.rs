//! Row counter with periodic progress logging.

use std::time::Instant;
use tracing::debug;

/// Counts rows copied into one table.
///
/// Owned by a single table copy, so no synchronization is needed.
#[derive(Debug)]
pub struct ProgressCounter {
    table: String,
    rows: u64,
    interval: u64,
    started: Instant,
}

impl ProgressCounter {
    /// Log every `interval` rows. An interval of zero disables logging.
    pub fn new(table: impl Into<String>, interval: u64) -> Self {
        Self {
            table: table.into(),
            rows: 0,
            interval,
            started: Instant::now(),
        }
    }

    /// Record one row.
    pub fn record(&mut self) {
        self.rows += 1;
        if self.interval > 0 && self.rows % self.interval == 0 {
            debug!(
                "Copied {} rows to table {}... ({:.2}s)",
                self.rows,
                self.table,
                self.elapsed_seconds()
            );
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

//! Single-table copy pipeline.
//!
//! One table is copied over one source connection and one destination
//! connection: the source cursor streams pages of rows, each row goes through
//! the column converters, and the result feeds a single COPY. Once the rows
//! are in, every sequence owned by the table is moved past the new maximum.

mod progress;

pub use progress::ProgressCounter;

use crate::error::{MigrateError, Result};
use crate::source::{BlockingConnection, BlockingPool, PooledConnection, TableDescriptor};
use crate::target::{SequenceDescriptor, TargetConnection, TargetPool};
use crate::typemap::{build_converters, convert_row};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Tuning for a table copy.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Rows between progress log lines.
    pub progress_interval: u64,
}

/// Outcome of one table copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableReport {
    pub table: String,
    pub rows: u64,
    pub elapsed_seconds: f64,
    /// Sequences moved past the copied data.
    pub sequences_reset: usize,
    /// Sequence lookups or resets that failed (logged, not fatal).
    pub sequences_failed: usize,
}

/// Copy every row of `table` and reconcile its sequences.
///
/// Fails if the destination cannot resolve every source column, or if
/// streaming or loading fails. Sequence failures are logged and counted in
/// the report only.
pub async fn copy_table<C, T>(
    source: &BlockingPool<C>,
    target: &T,
    table: &str,
    options: &CopyOptions,
    cancel: &CancellationToken,
) -> Result<TableReport>
where
    C: BlockingConnection,
    T: TargetPool,
{
    let timer = Instant::now();
    info!("Copying table {}", table);

    let rows = match load_rows(source, target, table, options, cancel).await {
        Ok(rows) => rows,
        Err(e) => {
            if e.is_cancelled() {
                debug!("{}: copy cancelled", table);
            } else {
                error!("Failed to copy table {}: {}", table, e);
            }
            return Err(MigrateError::copy(table, e));
        }
    };
    info!(
        "Copied {} rows to table {} ({:.2}s)",
        rows,
        table,
        timer.elapsed().as_secs_f64()
    );

    let (sequences_reset, sequences_failed) = reset_sequences(target, table, cancel).await;

    Ok(TableReport {
        table: table.to_string(),
        rows,
        elapsed_seconds: timer.elapsed().as_secs_f64(),
        sequences_reset,
        sequences_failed,
    })
}

async fn load_rows<C, T>(
    source: &BlockingPool<C>,
    target: &T,
    table: &str,
    options: &CopyOptions,
    cancel: &CancellationToken,
) -> Result<u64>
where
    C: BlockingConnection,
    T: TargetPool,
{
    if cancel.is_cancelled() {
        return Err(MigrateError::Cancelled);
    }
    let mut source_conn = source.acquire().await?;
    let mut target_conn = target.acquire().await?;
    let result = stream_rows(&mut source_conn, &mut target_conn, table, options, cancel).await;
    source_conn.release();
    drop(target_conn);
    result
}

async fn stream_rows<C, D>(
    source_conn: &mut PooledConnection<C>,
    target_conn: &mut D,
    table: &str,
    options: &CopyOptions,
    cancel: &CancellationToken,
) -> Result<u64>
where
    C: BlockingConnection,
    D: TargetConnection,
{
    let descriptor = TableDescriptor {
        name: table.to_string(),
        columns: source_conn.describe_columns(table).await?,
    };
    if descriptor.columns.is_empty() {
        return Err(MigrateError::SourceQuery(format!(
            "table {} has no columns in the source database",
            table
        )));
    }
    let columns = descriptor.column_names();

    let types = target_conn.column_types(table, &columns).await?;
    if types.len() != columns.len() {
        return Err(MigrateError::SchemaMismatch {
            table: table.to_string(),
            source_columns: columns.len(),
            target_columns: types.len(),
        });
    }
    let converters = build_converters(&types);
    debug!("{}: {} columns, converters {:?}", table, columns.len(), converters);

    let mut progress = ProgressCounter::new(table, options.progress_interval);
    let cursor = source_conn.cursor(table, &columns, cancel.clone()).await?;
    let rows = cursor
        .into_stream()
        .map(|row| row.and_then(|row| convert_row(row, &converters)))
        .inspect_ok(|_| progress.record())
        .boxed();

    let copied = target_conn.copy_rows(table, &columns, rows).await?;
    if copied != progress.rows() {
        debug!(
            "{}: destination reported {} rows, streamed {}",
            table,
            copied,
            progress.rows()
        );
    }
    Ok(progress.rows())
}

/// Reset every sequence owned by `table`, each over its own connection.
///
/// Returns (reset, failed). Stops early once `cancel` fires, since the run
/// is already failing.
async fn reset_sequences<T: TargetPool>(
    target: &T,
    table: &str,
    cancel: &CancellationToken,
) -> (usize, usize) {
    let sequences = match owned_sequences(target, table).await {
        Ok(sequences) => sequences,
        Err(e) => {
            error!("Failed to look up sequences of table {}: {}", table, e);
            return (0, 1);
        }
    };

    let mut reset = 0;
    let mut failed = 0;
    for sequence in &sequences {
        if cancel.is_cancelled() {
            debug!("{}: skipping remaining sequence resets after cancellation", table);
            break;
        }
        let timer = Instant::now();
        info!("Resetting sequence {}", sequence.sequence);
        match reset_sequence(target, table, sequence).await {
            Ok(next) => {
                reset += 1;
                info!(
                    "Reset sequence {} to {} ({:.2}s)",
                    sequence.sequence,
                    next,
                    timer.elapsed().as_secs_f64()
                );
            }
            Err(e) => {
                failed += 1;
                error!("{}", MigrateError::sequence_reset(&sequence.sequence, e));
            }
        }
    }
    (reset, failed)
}

async fn owned_sequences<T: TargetPool>(target: &T, table: &str) -> Result<Vec<SequenceDescriptor>> {
    let mut conn = target.acquire().await?;
    conn.owned_sequences(table).await
}

async fn reset_sequence<T: TargetPool>(
    target: &T,
    table: &str,
    sequence: &SequenceDescriptor,
) -> Result<i64> {
    let mut conn = target.acquire().await?;
    conn.reset_sequence(table, sequence).await
}

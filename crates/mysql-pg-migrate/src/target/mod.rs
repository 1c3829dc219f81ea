//! PostgreSQL target database operations.

mod copy;
mod postgres;

pub use copy::{encode_row, sql_value_to_copy_text};
pub use postgres::{PgConnection, PgPool};

use crate::error::Result;
use crate::typemap::ColumnType;
use crate::value::Row;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Rows fed to a bulk load.
pub type RowStream<'a> = BoxStream<'a, Result<Row>>;

/// A destination sequence owned by a table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceDescriptor {
    /// Column the sequence feeds.
    pub column: String,
    /// Sequence name, schema-qualified as the server prints it.
    pub sequence: String,
}

/// Pool of destination connections.
#[async_trait]
pub trait TargetPool: Send + Sync + 'static {
    type Connection: TargetConnection;

    /// Check out a connection, waiting while all are in use.
    async fn acquire(&self) -> Result<Self::Connection>;

    /// Close the pool. Outstanding connections are dropped as they return.
    async fn close(&self);
}

/// Operations the migration needs from one destination session.
#[async_trait]
pub trait TargetConnection: Send {
    /// Truncate all `tables` in a single statement. No-op for an empty list.
    async fn truncate(&mut self, tables: &[String]) -> Result<()>;

    /// Resolve the type of each of `columns` of `table`, in the given order.
    ///
    /// Columns that do not exist at the destination are left out, so a
    /// shorter result signals a schema mismatch.
    async fn column_types(&mut self, table: &str, columns: &[String]) -> Result<Vec<ColumnType>>;

    /// Bulk-load `rows` into `columns` of `table`. Returns rows written.
    ///
    /// An error from the stream aborts the load.
    async fn copy_rows(&mut self, table: &str, columns: &[String], rows: RowStream<'_>) -> Result<u64>;

    /// Sequences owned by columns of `table`.
    async fn owned_sequences(&mut self, table: &str) -> Result<Vec<SequenceDescriptor>>;

    /// Set `sequence` so its next value is one past the column maximum
    /// (1 for an empty table). Returns that next value.
    async fn reset_sequence(&mut self, table: &str, sequence: &SequenceDescriptor) -> Result<i64>;
}

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified name part by part.
pub fn quote_qualified(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

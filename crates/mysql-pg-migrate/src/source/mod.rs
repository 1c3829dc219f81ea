//! Source database access through a synchronous-only client.
//!
//! The MySQL client is blocking, so it never runs on the async runtime.
//! [`BlockingPool`] owns a bounded set of worker threads, each holding one
//! connection, and exposes their calls as futures; [`RowCursor`] turns the
//! driver's page fetches into a row stream.

mod cursor;
mod mysql;
mod pool;

pub use self::cursor::RowCursor;
pub use self::mysql::{MysqlConnection, MysqlCursor, MysqlDriver};
pub use self::pool::{BlockingPool, PooledConnection};

use crate::error::Result;
use crate::value::Row;
use serde::{Deserialize, Serialize};

/// Column metadata from the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// 1-based physical position.
    pub ordinal: u32,
}

/// Table metadata read once at the start of a table copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    /// Columns in physical order.
    pub columns: Vec<Column>,
}

impl TableDescriptor {
    /// Column names in physical order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Factory for blocking connections.
pub trait BlockingDriver: Send + Sync + 'static {
    type Connection: BlockingConnection;

    /// Open a new connection. Blocks the calling thread.
    fn connect(&self) -> Result<Self::Connection>;

    /// Short name used for worker threads and log lines.
    fn name(&self) -> &str;
}

/// Synchronous capability contract required from the source client.
///
/// Every method blocks the calling thread; callers go through
/// [`PooledConnection`], which runs them on a worker thread.
pub trait BlockingConnection: Send + 'static {
    type Cursor<'c>: BlockingCursor
    where
        Self: 'c;

    /// Names of all base tables in the current database.
    fn list_tables(&mut self) -> Result<Vec<String>>;

    /// Columns of `table` in physical order.
    fn describe_columns(&mut self, table: &str) -> Result<Vec<Column>>;

    /// Open a streaming cursor over exactly `columns` of `table`.
    fn open_cursor(&mut self, table: &str, columns: &[String]) -> Result<Self::Cursor<'_>>;

    /// Close the connection.
    fn close(self) -> Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// An open server-side cursor.
pub trait BlockingCursor {
    /// Fetch up to `size` rows. An empty page means the cursor is exhausted.
    fn fetch_page(&mut self, size: usize) -> Result<Vec<Row>>;

    /// Stop the statement behind a cursor abandoned before it ran dry.
    ///
    /// Called on the worker right before the cursor is dropped, so a driver
    /// whose result sets drain on drop does not read the rest of the table.
    fn abort(&mut self) -> Result<()> {
        Ok(())
    }
}

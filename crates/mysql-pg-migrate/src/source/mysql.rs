//! MySQL source driver built on the synchronous `mysql` client.

use super::{BlockingConnection, BlockingCursor, BlockingDriver, Column};
use crate::config::SourceConfig;
use crate::error::Result;
use crate::value::{Row, SqlValue};
use ::mysql::consts::ColumnType as MyColumnType;
use ::mysql::prelude::Queryable;
use ::mysql::{Binary, Conn, Opts, QueryResult, Value};
use chrono::NaiveDate;
use tracing::info;

/// Character set id MySQL reports for binary strings.
const BINARY_CHARSET: u16 = 63;

/// Opens MySQL connections with fixed options.
pub struct MysqlDriver {
    opts: Opts,
}

impl MysqlDriver {
    pub fn new(config: &SourceConfig) -> Self {
        Self { opts: config.opts() }
    }
}

impl BlockingDriver for MysqlDriver {
    type Connection = MysqlConnection;

    fn connect(&self) -> Result<MysqlConnection> {
        let mut conn = Conn::new(self.opts.clone())?;
        conn.query_drop("SELECT 1")?;
        info!(
            "Connected to MySQL source: {}:{}/{}",
            self.opts.get_ip_or_hostname(),
            self.opts.get_tcp_port(),
            self.opts.get_db_name().unwrap_or_default()
        );
        Ok(MysqlConnection {
            conn,
            opts: self.opts.clone(),
        })
    }

    fn name(&self) -> &str {
        "mysql"
    }
}

/// One MySQL session.
pub struct MysqlConnection {
    conn: Conn,
    opts: Opts,
}

impl BlockingConnection for MysqlConnection {
    type Cursor<'c> = MysqlCursor<'c>;

    fn list_tables(&mut self) -> Result<Vec<String>> {
        let tables = self.conn.query_map(
            "SHOW FULL TABLES WHERE Table_type = 'BASE TABLE'",
            |(name, _kind): (String, String)| name,
        )?;
        Ok(tables)
    }

    fn describe_columns(&mut self, table: &str) -> Result<Vec<Column>> {
        let columns = self.conn.exec_map(
            r#"
            SELECT COLUMN_NAME, ORDINAL_POSITION
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
            "#,
            (table,),
            |(name, ordinal): (String, u32)| Column { name, ordinal },
        )?;
        Ok(columns)
    }

    fn open_cursor(&mut self, table: &str, columns: &[String]) -> Result<MysqlCursor<'_>> {
        let select = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!("SELECT {} FROM {}", select, quote_ident(table));
        let connection_id = self.conn.connection_id();
        let opts = self.opts.clone();
        let result = self.conn.exec_iter(query, ())?;
        Ok(MysqlCursor {
            result,
            kinds: None,
            connection_id,
            opts,
        })
    }

    fn close(self) -> Result<()> {
        drop(self.conn);
        Ok(())
    }
}

/// Unbuffered result set of a table scan.
///
/// Dropping a `QueryResult` reads it to the end, so an abandoned scan is
/// first interrupted server-side by [`abort`](BlockingCursor::abort).
pub struct MysqlCursor<'c> {
    result: QueryResult<'c, 'c, 'c, Binary>,
    kinds: Option<Vec<ValueKind>>,
    connection_id: u32,
    opts: Opts,
}

impl BlockingCursor for MysqlCursor<'_> {
    fn fetch_page(&mut self, size: usize) -> Result<Vec<Row>> {
        let mut page = Vec::with_capacity(size);
        while page.len() < size {
            let Some(row) = self.result.next() else {
                break;
            };
            let mut row = row?;
            let kinds = self
                .kinds
                .get_or_insert_with(|| row.columns_ref().iter().map(ValueKind::of).collect());
            let values = kinds
                .iter()
                .enumerate()
                .map(|(i, kind)| {
                    let value = row.take::<Value, usize>(i).unwrap_or(Value::NULL);
                    decode_value(value, *kind)
                })
                .collect();
            page.push(values);
        }
        Ok(page)
    }

    fn abort(&mut self) -> Result<()> {
        let mut side = Conn::new(self.opts.clone())?;
        side.query_drop(kill_query(self.connection_id))?;
        info!("Interrupted source scan on connection {}", self.connection_id);
        Ok(())
    }
}

/// Statement interrupting whatever `connection_id` is running while leaving
/// the session open.
fn kill_query(connection_id: u32) -> String {
    format!("KILL QUERY {}", connection_id)
}

/// How raw protocol values of a column are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Text,
    Binary,
    Date,
    DateTime,
}

impl ValueKind {
    fn of(column: &::mysql::Column) -> Self {
        match column.column_type() {
            MyColumnType::MYSQL_TYPE_DATE | MyColumnType::MYSQL_TYPE_NEWDATE => ValueKind::Date,
            MyColumnType::MYSQL_TYPE_DATETIME
            | MyColumnType::MYSQL_TYPE_DATETIME2
            | MyColumnType::MYSQL_TYPE_TIMESTAMP
            | MyColumnType::MYSQL_TYPE_TIMESTAMP2 => ValueKind::DateTime,
            MyColumnType::MYSQL_TYPE_BIT => ValueKind::Binary,
            MyColumnType::MYSQL_TYPE_TINY_BLOB
            | MyColumnType::MYSQL_TYPE_MEDIUM_BLOB
            | MyColumnType::MYSQL_TYPE_LONG_BLOB
            | MyColumnType::MYSQL_TYPE_BLOB
            | MyColumnType::MYSQL_TYPE_VAR_STRING
            | MyColumnType::MYSQL_TYPE_VARCHAR
            | MyColumnType::MYSQL_TYPE_STRING
            | MyColumnType::MYSQL_TYPE_GEOMETRY
                if column.character_set() == BINARY_CHARSET =>
            {
                ValueKind::Binary
            }
            _ => ValueKind::Text,
        }
    }
}

fn decode_value(value: Value, kind: ValueKind) -> SqlValue {
    match value {
        Value::NULL => SqlValue::Null,
        Value::Int(n) => SqlValue::Int(n),
        Value::UInt(n) => SqlValue::UInt(n),
        Value::Float(f) => SqlValue::Float(f),
        Value::Double(f) => SqlValue::Double(f),
        Value::Bytes(bytes) => match kind {
            ValueKind::Binary => SqlValue::Bytes(bytes),
            _ => SqlValue::Text(
                String::from_utf8(bytes)
                    .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()),
            ),
        },
        Value::Date(year, month, day, hour, minute, second, micros) => {
            // Zero dates ('0000-00-00') have no PostgreSQL equivalent.
            let Some(date) = NaiveDate::from_ymd_opt(year.into(), month.into(), day.into()) else {
                return SqlValue::Null;
            };
            match kind {
                ValueKind::Date => SqlValue::Date(date),
                _ => date
                    .and_hms_micro_opt(hour.into(), minute.into(), second.into(), micros)
                    .map(SqlValue::DateTime)
                    .unwrap_or(SqlValue::Null),
            }
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            SqlValue::Text(format_time(negative, days, hours, minutes, seconds, micros))
        }
    }
}

/// Render a MySQL TIME as `[-]HHH:MM:SS.ffffff`, valid `time` and `interval`
/// input for PostgreSQL.
fn format_time(negative: bool, days: u32, hours: u8, minutes: u8, seconds: u8, micros: u32) -> String {
    let total_hours = u64::from(days) * 24 + u64::from(hours);
    format!(
        "{}{:02}:{:02}:{:02}.{:06}",
        if negative { "-" } else { "" },
        total_hours,
        minutes,
        seconds,
        micros
    )
}

/// Quote a MySQL identifier.
fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

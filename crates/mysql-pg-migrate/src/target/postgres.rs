//! PostgreSQL implementation of the target traits.

use super::copy::encode_row;
use super::{quote_ident, quote_qualified, RowStream, SequenceDescriptor, TargetConnection, TargetPool};
use crate::config::TargetConfig;
use crate::error::{MigrateError, Result};
use crate::typemap::ColumnType;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::{SinkExt, StreamExt};
use tokio_postgres::{CopyInSink, NoTls};
use tracing::{debug, info};

/// PostgreSQL target pool.
pub struct PgPool {
    pool: Pool,
    copy_flush_rows: usize,
}

impl PgPool {
    /// Create the pool and verify a connection can be opened.
    pub async fn new(config: &TargetConfig, max_conns: usize, copy_flush_rows: usize) -> Result<Self> {
        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(config.pg_config(), NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(max_conns)
            .build()
            .map_err(|e| MigrateError::pool(e, "creating PostgreSQL target pool"))?;

        // Test connection
        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "testing PostgreSQL target connection"))?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL target: {}:{}/{}",
            config.host.as_deref().unwrap_or("localhost"),
            config.port.unwrap_or(5432),
            config.database.as_deref().unwrap_or_default()
        );

        Ok(Self { pool, copy_flush_rows })
    }
}

#[async_trait]
impl TargetPool for PgPool {
    type Connection = PgConnection;

    async fn acquire(&self) -> Result<PgConnection> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "acquiring PostgreSQL connection"))?;
        Ok(PgConnection {
            client,
            copy_flush_rows: self.copy_flush_rows,
        })
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// A pooled PostgreSQL session.
pub struct PgConnection {
    client: Object,
    copy_flush_rows: usize,
}

#[async_trait]
impl TargetConnection for PgConnection {
    async fn truncate(&mut self, tables: &[String]) -> Result<()> {
        if tables.is_empty() {
            return Ok(());
        }
        let list = tables
            .iter()
            .map(|t| quote_qualified(t))
            .collect::<Vec<_>>()
            .join(", ");
        self.client.execute(&format!("TRUNCATE {}", list), &[]).await?;
        debug!("Truncated {} tables", tables.len());
        Ok(())
    }

    async fn column_types(&mut self, table: &str, columns: &[String]) -> Result<Vec<ColumnType>> {
        let sql = r#"
            SELECT n.nspname::text, t.typname::text
            FROM unnest($2::text[]) WITH ORDINALITY AS d(name, ordinal)
            JOIN pg_catalog.pg_attribute a
              ON a.attrelid = $1::text::regclass AND a.attname = d.name AND NOT a.attisdropped
            JOIN pg_catalog.pg_type t ON t.oid = a.atttypid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
            ORDER BY d.ordinal
        "#;
        let table_ref = quote_qualified(table);
        let rows = self.client.query(sql, &[&table_ref, &columns]).await?;
        Ok(rows
            .iter()
            .map(|row| ColumnType::new(row.get::<_, String>(0), row.get::<_, String>(1)))
            .collect())
    }

    async fn copy_rows(&mut self, table: &str, columns: &[String], mut rows: RowStream<'_>) -> Result<u64> {
        let col_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let copy_stmt = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT text)",
            quote_qualified(table),
            col_list
        );

        let sink: CopyInSink<Bytes> = self.client.copy_in(&copy_stmt).await?;
        futures::pin_mut!(sink);

        let mut buf = BytesMut::with_capacity(1024 * 1024);
        let mut pending = 0usize;
        while let Some(row) = rows.next().await {
            // Returning here drops the sink unfinished, which aborts the COPY.
            let row = row?;
            encode_row(&row, &mut buf);
            pending += 1;
            if pending >= self.copy_flush_rows {
                sink.send(buf.split().freeze()).await?;
                pending = 0;
            }
        }
        if !buf.is_empty() {
            sink.send(buf.split().freeze()).await?;
        }

        let copied = sink.finish().await?;
        Ok(copied)
    }

    async fn owned_sequences(&mut self, table: &str) -> Result<Vec<SequenceDescriptor>> {
        let sql = r#"
            SELECT a.attname::text, s.sequence
            FROM pg_catalog.pg_attribute a
            JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
            CROSS JOIN LATERAL (
                SELECT pg_get_serial_sequence(c.oid::regclass::text, a.attname) AS sequence
            ) s
            WHERE a.attrelid = $1::text::regclass
              AND c.relkind IN ('r', 'p')
              AND a.attnum > 0
              AND NOT a.attisdropped
              AND s.sequence IS NOT NULL
            ORDER BY a.attnum
        "#;
        let table_ref = quote_qualified(table);
        let rows = self.client.query(sql, &[&table_ref]).await?;
        Ok(rows
            .iter()
            .map(|row| SequenceDescriptor {
                column: row.get(0),
                sequence: row.get(1),
            })
            .collect())
    }

    async fn reset_sequence(&mut self, table: &str, sequence: &SequenceDescriptor) -> Result<i64> {
        let sql = format!(
            "SELECT setval($1::text::regclass, 1 + COALESCE((SELECT MAX({})::bigint FROM {}), 0), false)",
            quote_ident(&sequence.column),
            quote_qualified(table)
        );
        let row = self.client.query_one(&sql, &[&sequence.sequence]).await?;
        Ok(row.get(0))
    }
}

//! # mysql-pg-migrate
//!
//! Bulk copy of MySQL tables into an existing PostgreSQL schema.
//!
//! The destination tables must already exist. A run:
//!
//! - **Resolves the table set** from the caller or the source database
//! - **Truncates** every selected destination table in one statement
//! - **Copies tables in parallel**, each over one source cursor feeding one
//!   PostgreSQL `COPY`, with boolean coercion for `bool` columns
//! - **Resets owned sequences** past the copied data
//!
//! The MySQL client is synchronous; its calls run on dedicated worker
//! threads behind an async facade so the runtime never blocks on them.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mysql_pg_migrate::{Config, Migrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> mysql_pg_migrate::Result<()> {
//!     let config = Config::from_env()?;
//!     let migrator = Migrator::connect(&config).await?;
//!     let result = migrator.run(None, CancellationToken::new()).await?;
//!     println!("Migrated {} rows", result.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod parallel;
pub mod source;
pub mod target;
pub mod transfer;
pub mod typemap;
pub mod value;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig};
pub use error::{MigrateError, Result};
pub use orchestrator::{MigrationResult, Migrator};
pub use parallel::{TaskGroup, Throttle};
pub use source::{BlockingPool, MysqlDriver};
pub use target::PgPool;
pub use transfer::{copy_table, CopyOptions, TableReport};
pub use value::{Row, SqlValue};

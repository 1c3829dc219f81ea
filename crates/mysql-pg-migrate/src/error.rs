//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (bad environment value, invalid YAML field, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source and destination disagree on the number of columns of a table.
    #[error(
        "Schema mismatch for table {table}: source has {source_columns} columns, \
         destination resolved {target_columns}"
    )]
    SchemaMismatch {
        table: String,
        source_columns: usize,
        target_columns: usize,
    },

    /// Streaming rows or bulk-loading them into the destination failed.
    #[error("Failed to copy table {table}: {source}")]
    Copy {
        table: String,
        #[source]
        source: Box<MigrateError>,
    },

    /// Reconciling one destination sequence failed.
    #[error("Failed to reset sequence {sequence}: {source}")]
    SequenceReset {
        sequence: String,
        #[source]
        source: Box<MigrateError>,
    },

    /// The operation was cancelled (sibling failure, SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,

    /// MySQL driver error
    #[error("Source database error: {0}")]
    Mysql(#[from] mysql::Error),

    /// PostgreSQL driver error
    #[error("Target database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Source query returned something the driver layer could not use
    #[error("Source query failed: {0}")]
    SourceQuery(String),

    /// A spawned task panicked or was torn down unexpectedly
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Wrap a failure of the row-copy phase for `table`.
    ///
    /// Schema mismatches and cancellation keep their own identity so the
    /// task group can still tell them apart.
    pub fn copy(table: impl Into<String>, source: MigrateError) -> Self {
        match source {
            MigrateError::SchemaMismatch { .. }
            | MigrateError::Cancelled
            | MigrateError::Copy { .. } => source,
            other => MigrateError::Copy {
                table: table.into(),
                source: Box::new(other),
            },
        }
    }

    /// Wrap a failure while resetting `sequence`.
    pub fn sequence_reset(sequence: impl Into<String>, source: MigrateError) -> Self {
        MigrateError::SequenceReset {
            sequence: sequence.into(),
            source: Box::new(source),
        }
    }

    /// True for the cancellation signal raised into sibling tasks.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MigrateError::Cancelled)
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

//! Per-column value converters derived from destination column types.
//!
//! The coercion layer is deliberately narrow: every column passes through
//! unchanged except destination `pg_catalog.bool` columns, which receive
//! booleans whatever the source representation (`TINYINT(1)`, `BIT(1)`, ...).

use crate::error::{MigrateError, Result};
use crate::value::{Row, SqlValue};
use serde::{Deserialize, Serialize};

/// Destination column type as reported by catalog introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnType {
    /// Namespace owning the type (e.g. `pg_catalog`).
    pub namespace: String,
    /// Physical type name (e.g. `bool`, `int4`, `timestamptz`).
    pub name: String,
}

impl ColumnType {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// Pure value transformation applied to one column during the copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converter {
    Identity,
    Bool,
}

impl Converter {
    /// Choose the converter for a destination column type.
    pub fn for_type(column_type: &ColumnType) -> Self {
        match (column_type.namespace.as_str(), column_type.name.as_str()) {
            ("pg_catalog", "bool") => Converter::Bool,
            _ => Converter::Identity,
        }
    }

    /// Apply the conversion.
    pub fn apply(self, value: SqlValue) -> SqlValue {
        match self {
            Converter::Identity => value,
            Converter::Bool => SqlValue::Bool(value.truthiness()),
        }
    }
}

/// Build the positional converter list for a table's destination types.
pub fn build_converters(types: &[ColumnType]) -> Vec<Converter> {
    types.iter().map(Converter::for_type).collect()
}

/// Apply converters positionally to one row.
pub fn convert_row(row: Row, converters: &[Converter]) -> Result<Row> {
    if row.len() != converters.len() {
        return Err(MigrateError::SourceQuery(format!(
            "row has {} values but {} columns were selected",
            row.len(),
            converters.len()
        )));
    }
    Ok(row
        .into_iter()
        .zip(converters)
        .map(|(value, converter)| converter.apply(value))
        .collect())
}

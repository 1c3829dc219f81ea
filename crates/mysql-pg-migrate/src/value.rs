//! SQL value model shared by the source driver, converters and COPY encoder.

use chrono::{NaiveDate, NaiveDateTime};

/// One row of values in source column order.
pub type Row = Vec<SqlValue>;

/// A single value read from the source.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    /// Character data (also DECIMAL, JSON and TIME rendered as text).
    Text(String),
    /// Binary-charset strings, BLOBs and BIT values.
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl SqlValue {
    /// Truthiness used by the boolean coercion. NULL is false.
    pub fn truthiness(&self) -> bool {
        match self {
            SqlValue::Null => false,
            SqlValue::Bool(b) => *b,
            SqlValue::Int(n) => *n != 0,
            SqlValue::UInt(n) => *n != 0,
            SqlValue::Float(n) => *n != 0.0,
            SqlValue::Double(n) => *n != 0.0,
            SqlValue::Text(s) => !matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "" | "0" | "f" | "false" | "n" | "no" | "off"
            ),
            // BIT(n) arrives as big-endian bytes: any set bit is true.
            SqlValue::Bytes(b) => b.iter().any(|byte| *byte != 0),
            SqlValue::Date(_) | SqlValue::DateTime(_) => true,
        }
    }
}

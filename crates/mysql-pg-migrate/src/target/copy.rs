//! PostgreSQL COPY text-format encoding.

use crate::value::SqlValue;
use bytes::{BufMut, BytesMut};

/// Append one row as a COPY text line (tab-separated, newline-terminated).
pub fn encode_row(row: &[SqlValue], buf: &mut BytesMut) {
    for (i, value) in row.iter().enumerate() {
        if i > 0 {
            buf.put_u8(b'\t');
        }
        buf.extend_from_slice(sql_value_to_copy_text(value).as_bytes());
    }
    buf.put_u8(b'\n');
}

/// Convert SqlValue to text format for COPY.
pub fn sql_value_to_copy_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "\\N".to_string(),
        SqlValue::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        SqlValue::Int(n) => n.to_string(),
        SqlValue::UInt(n) => n.to_string(),
        SqlValue::Float(n) => float_text(f64::from(*n), n.to_string()),
        SqlValue::Double(n) => float_text(*n, n.to_string()),
        SqlValue::Text(s) => escape_copy_text(s),
        SqlValue::Bytes(b) => format!("\\\\x{}", hex::encode(b)),
        SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
    }
}

fn float_text(value: f64, finite: String) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        finite
    }
}

/// Escape special characters for COPY text format.
fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}

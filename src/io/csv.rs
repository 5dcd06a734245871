//! Tabular (CSV) encoding.
//!
//! Rows are decoded against the file's header into [`Record`]s with scalar
//! inference, and encoded back following a fixed header order so every row of
//! a destination lines up with its header.

use crate::record::Record;
use serde_json::Value;

/// Decode one row into a [`Record`] using `headers` for field names.
///
/// Scalar inference per field: integer, then float, then bool; anything else
/// stays a string. Rows shorter than the header simply omit the trailing
/// fields.
pub fn record_from_row(headers: &csv::StringRecord, row: &csv::StringRecord) -> Record {
    let mut record = Record::new();
    for (name, field) in headers.iter().zip(row.iter()) {
        record.insert(name.to_string(), infer_scalar(field));
    }
    record
}

fn infer_scalar(field: &str) -> Value {
    if let Ok(i) = field.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = field.parse::<f64>() {
        return Value::from(f);
    }
    match field {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        other => Value::String(other.to_string()),
    }
}

/// Render a record as one row following `headers` order.
///
/// Missing fields become empty; null renders empty; nested values are
/// serialized as compact JSON.
pub fn row_from_record(headers: &[String], record: &Record) -> Vec<String> {
    headers
        .iter()
        .map(|name| record.get(name).map(render_field).unwrap_or_default())
        .collect()
}

fn render_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

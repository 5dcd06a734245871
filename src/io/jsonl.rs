//! Newline-delimited JSON encoding.

use crate::record::Record;
use anyhow::{Context, Result};
use std::io::Write;

/// Parse one line as a JSON object.
///
/// # Errors
///
/// Returns an error if the line is not valid JSON or not an object.
pub fn parse_line(line: &str) -> Result<Record> {
    serde_json::from_str::<Record>(line).with_context(|| {
        // Truncate by characters, not bytes: the line may hold multi-byte
        // text and slicing mid-character would panic.
        let preview: String = line.chars().take(120).collect();
        format!("parse JSONL line: {preview}")
    })
}

/// Serialize one record as a single JSON line.
///
/// # Errors
///
/// Returns an error if serialization or the underlying write fails.
pub fn write_record(w: &mut impl Write, record: &Record) -> Result<()> {
    serde_json::to_writer(&mut *w, record).context("serialize record")?;
    w.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_objects_and_rejects_scalars() {
        let rec = parse_line(r#"{"id": 1, "name": "a"}"#).unwrap();
        assert_eq!(rec.get("id"), Some(&json!(1)));
        assert!(parse_line("42").is_err());
        assert!(parse_line("not json").is_err());
    }

    #[test]
    fn long_multibyte_malformed_line_is_an_error_not_a_panic() {
        // More than 120 bytes of two-byte characters, so a naive byte
        // truncation of the error preview would split a character.
        let line = format!("a{}", "é".repeat(200));
        assert!(parse_line(&line).is_err());

        let line = format!("b{}", "€".repeat(50));
        assert!(parse_line(&line).is_err());
    }

    #[test]
    fn writes_one_line_per_record() {
        let rec = parse_line(r#"{"b": 1, "a": 2}"#).unwrap();
        let mut buf = Vec::new();
        write_record(&mut buf, &rec).unwrap();
        // Field order survives the round trip.
        assert_eq!(String::from_utf8(buf).unwrap(), "{\"b\":1,\"a\":2}\n");
    }
}

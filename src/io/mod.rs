//! Format primitives used by the record source and the writer.
//!
//! The line-oriented formats are deliberately small: one function pair to
//! decode a physical row into a [`Record`](crate::record::Record) and encode
//! one back, with all state (offsets, headers, buffering) living with the
//! caller. The columnar format carries its own reader and writer, since row
//! groups and schemas cannot be handled a line at a time.

#[cfg(feature = "io-csv")]
pub mod csv;
pub mod jsonl;
#[cfg(feature = "io-parquet")]
pub mod parquet;

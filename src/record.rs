//! Core data model shared across pipeline stages.
//!
//! Records are opaque to the engine: field names and values only ever matter
//! to the transform. Batches are the unit of parallel dispatch; sequence
//! numbers assigned by the source are the sole ordering key for reassembly.

use serde_json::Value;

/// An ordered mapping of field name to value.
///
/// The pipeline never inspects field semantics; transforms own all
/// interpretation.
pub type Record = serde_json::Map<String, Value>;

/// Byte range of the input file covered by one batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceSpan {
    pub start_offset: u64,
    pub end_offset: u64,
}

/// A contiguous, sequence-numbered group of input records dispatched as one
/// unit of parallel work.
///
/// Sequence numbers are unique, contiguous, and strictly increasing per run.
/// `rows_consumed` is the cumulative number of source rows consumed through
/// the end of this batch; it rides along so the checkpoint can resume
/// row-count based formats.
#[derive(Debug)]
pub struct Batch {
    pub sequence: u64,
    pub records: Vec<Record>,
    pub span: SourceSpan,
    pub rows_consumed: u64,
}

/// One transform output: a record routed to a destination index.
#[derive(Debug)]
pub struct Routed {
    pub record: Record,
    pub destination: usize,
}

/// Results derived from one [`Batch`], carrying the same sequence number.
///
/// Result order mirrors the source record order of the batch it came from.
/// A result batch may hold fewer results than its source batch had records;
/// dropped records simply do not appear.
#[derive(Debug)]
pub struct ResultBatch {
    pub sequence: u64,
    pub results: Vec<Routed>,
    pub span: SourceSpan,
    pub rows_consumed: u64,
}

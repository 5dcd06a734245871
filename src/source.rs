//! Streaming record source with bounded memory and resume support.
//!
//! The source owns the only read position over the input file. It yields
//! sequence-numbered batches, tracking byte offsets (for seekable resume) and
//! physical row counts (for formats that must resume by skipping rows).
//! Malformed rows are skipped and counted, never fatal.

use crate::checkpoint::Checkpoint;
use crate::config::{Format, JobConfig};
use crate::record::{Batch, SourceSpan};
use crate::stats::Progress;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::sync::Arc;
use tracing::{info, warn};

enum FormatReader {
    Jsonl(BufReader<File>),
    #[cfg(feature = "io-csv")]
    Csv {
        reader: csv::Reader<File>,
        headers: csv::StringRecord,
    },
    #[cfg(feature = "io-parquet")]
    Parquet(crate::io::parquet::RecordReader),
}

/// Reads the input file batch by batch.
pub struct RecordSource {
    reader: FormatReader,
    batch_size: usize,
    next_sequence: u64,
    offset: u64,
    rows_consumed: u64,
    progress: Arc<Progress>,
    line: String,
}

impl RecordSource {
    /// Open the input, positioned either at the start or just past the data
    /// covered by `resume`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input cannot be opened, the resume position
    /// cannot be reached, or (for tabular input) the header cannot be read.
    pub fn open(
        config: &JobConfig,
        resume: Option<&Checkpoint>,
        progress: Arc<Progress>,
    ) -> Result<Self> {
        let file = File::open(&config.input)
            .with_context(|| format!("open input {}", config.input.display()))?;

        let mut offset = 0u64;
        let mut rows_consumed = 0u64;
        let reader = match config.format {
            Format::Jsonl => {
                let mut reader = BufReader::new(file);
                if let Some(checkpoint) = resume {
                    reader
                        .seek(SeekFrom::Start(checkpoint.source_offset))
                        .context("seek to resume offset")?;
                    offset = checkpoint.source_offset;
                    rows_consumed = checkpoint.rows_consumed;
                }
                FormatReader::Jsonl(reader)
            }
            #[cfg(feature = "io-csv")]
            Format::Csv => {
                let mut reader = csv::ReaderBuilder::new()
                    .flexible(true)
                    .from_reader(file);
                let headers = reader
                    .headers()
                    .with_context(|| format!("read header of {}", config.input.display()))?
                    .clone();
                // Quoted fields may span physical lines, so resume by
                // re-reading and discarding rows rather than seeking.
                if let Some(checkpoint) = resume {
                    let mut row = csv::StringRecord::new();
                    while rows_consumed < checkpoint.rows_consumed {
                        match reader.read_record(&mut row) {
                            Ok(true) => rows_consumed += 1,
                            Ok(false) => break,
                            Err(err) if !row_error_is_fatal(&err) => rows_consumed += 1,
                            Err(err) => {
                                return Err(err).context("skip rows to resume position")
                            }
                        }
                    }
                    offset = reader.position().byte();
                }
                FormatReader::Csv { reader, headers }
            }
            #[cfg(feature = "io-parquet")]
            Format::Parquet => {
                // Row-group readers manage their own file handle and skip by
                // row count, so byte offsets track rows for this format.
                drop(file);
                if let Some(checkpoint) = resume {
                    rows_consumed = checkpoint.rows_consumed;
                    offset = rows_consumed;
                }
                FormatReader::Parquet(crate::io::parquet::RecordReader::open(
                    &config.input,
                    config.batch_size,
                    rows_consumed,
                )?)
            }
        };

        let next_sequence = match resume {
            Some(checkpoint) => {
                info!(
                    sequence = checkpoint.last_committed_sequence,
                    offset = checkpoint.source_offset,
                    rows = checkpoint.rows_consumed,
                    "resuming from checkpoint"
                );
                checkpoint.last_committed_sequence + 1
            }
            None => 0,
        };

        Ok(Self {
            reader,
            batch_size: config.batch_size,
            next_sequence,
            offset,
            rows_consumed,
            progress,
            line: String::new(),
        })
    }

    /// Read the next batch, or `None` once the input is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error only for unrecoverable I/O failures; malformed rows
    /// are skipped and counted instead.
    pub fn next_batch(&mut self) -> Result<Option<Batch>> {
        let start_offset = self.offset;
        let mut records = Vec::with_capacity(self.batch_size);
        while records.len() < self.batch_size {
            match self.next_record()? {
                Some(record) => records.push(record),
                None => break,
            }
        }
        if records.is_empty() {
            return Ok(None);
        }
        let batch = Batch {
            sequence: self.next_sequence,
            records,
            span: SourceSpan {
                start_offset,
                end_offset: self.offset,
            },
            rows_consumed: self.rows_consumed,
        };
        self.next_sequence += 1;
        Ok(Some(batch))
    }

    fn next_record(&mut self) -> Result<Option<crate::record::Record>> {
        loop {
            match &mut self.reader {
                FormatReader::Jsonl(reader) => {
                    self.line.clear();
                    let n = reader.read_line(&mut self.line).context("read input line")?;
                    if n == 0 {
                        return Ok(None);
                    }
                    self.offset += n as u64;
                    if self.line.trim().is_empty() {
                        continue;
                    }
                    self.rows_consumed += 1;
                    match crate::io::jsonl::parse_line(self.line.trim_end()) {
                        Ok(record) => {
                            self.progress.record_read();
                            return Ok(Some(record));
                        }
                        Err(err) => {
                            self.progress.record_parse_error();
                            warn!(row = self.rows_consumed, error = %err, "skipping malformed row");
                        }
                    }
                }
                #[cfg(feature = "io-csv")]
                FormatReader::Csv { reader, headers } => {
                    let mut row = csv::StringRecord::new();
                    match reader.read_record(&mut row) {
                        Ok(false) => return Ok(None),
                        Ok(true) => {
                            self.offset = reader.position().byte();
                            self.rows_consumed += 1;
                            self.progress.record_read();
                            return Ok(Some(crate::io::csv::record_from_row(headers, &row)));
                        }
                        Err(err) if !row_error_is_fatal(&err) => {
                            self.offset = reader.position().byte();
                            self.rows_consumed += 1;
                            self.progress.record_parse_error();
                            warn!(row = self.rows_consumed, error = %err, "skipping malformed row");
                        }
                        Err(err) => return Err(err).context("read tabular row"),
                    }
                }
                #[cfg(feature = "io-parquet")]
                FormatReader::Parquet(reader) => match reader.next_record()? {
                    Some(record) => {
                        self.rows_consumed += 1;
                        self.offset = self.rows_consumed;
                        self.progress.record_read();
                        return Ok(Some(record));
                    }
                    None => return Ok(None),
                },
            }
        }
    }
}

#[cfg(feature = "io-csv")]
fn row_error_is_fatal(err: &csv::Error) -> bool {
    matches!(err.kind(), csv::ErrorKind::Io(_))
}

//! Columnar (Parquet) encoding.
//!
//! Rows travel through Arrow record batches; `serde_arrow` bridges them to
//! and from [`Record`]s. Reading streams batch by batch and can skip a row
//! prefix, which is how resume works for this format. Writing emits one row
//! group per commit; the schema is fixed by the first committed rows, so a
//! columnar destination requires records with a stable field shape. The file
//! footer is only written by [`RecordWriter::finish`], which the engine calls
//! after the last commit.

use crate::record::Record;
use anyhow::{Context, Result};
use arrow::datatypes::FieldRef;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;
use serde_arrow::schema::{SchemaLike, TracingOptions};
use serde_arrow::{from_record_batch, to_record_batch};
use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;

/// Streams decoded rows out of one columnar file.
pub struct RecordReader {
    reader: ParquetRecordBatchReader,
    pending: VecDeque<Record>,
}

impl RecordReader {
    /// Open `path`, positioned `skip_rows` rows in.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or is not a valid
    /// columnar file.
    pub fn open(path: &Path, batch_size: usize, skip_rows: u64) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open input {}", path.display()))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .with_context(|| format!("open columnar reader for {}", path.display()))?;
        let offset = usize::try_from(skip_rows).context("resume row count out of range")?;
        let reader = builder
            .with_batch_size(batch_size.max(1))
            .with_offset(offset)
            .build()
            .context("build columnar reader")?;
        Ok(Self {
            reader,
            pending: VecDeque::new(),
        })
    }

    /// Next decoded row, or `None` at end of file.
    ///
    /// # Errors
    ///
    /// Decode failures are fatal for this format: a damaged row group cannot
    /// be skipped a row at a time.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(Some(record));
            }
            match self.reader.next() {
                Some(batch) => {
                    let batch = batch.context("read columnar row group")?;
                    let rows: Vec<Record> =
                        from_record_batch(&batch).context("decode columnar rows")?;
                    self.pending = rows.into();
                }
                None => return Ok(None),
            }
        }
    }
}

/// Writes rows to one columnar file, one row group per flushed commit.
pub struct RecordWriter {
    out: Option<ArrowWriter<File>>,
    file: Option<File>,
    sync: File,
    fields: Option<Vec<FieldRef>>,
}

impl RecordWriter {
    /// Create (truncating) the destination file.
    pub fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("create destination {}", path.display()))?;
        let sync = file
            .try_clone()
            .with_context(|| format!("clone handle for {}", path.display()))?;
        Ok(Self {
            out: None,
            file: Some(file),
            sync,
            fields: None,
        })
    }

    /// Encode `records` into the current row group.
    ///
    /// # Errors
    ///
    /// Returns an error if the rows do not fit the schema fixed by the first
    /// committed rows, or on any write failure.
    pub fn write_rows(&mut self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let fields = match &self.fields {
            Some(fields) => fields.clone(),
            None => {
                // The first committed rows fix the schema, the columnar
                // analogue of a tabular header.
                let options = TracingOptions::default().coerce_numbers(true);
                let fields = Vec::<FieldRef>::from_samples(records, options)
                    .context("infer columnar schema")?;
                self.fields = Some(fields.clone());
                fields
            }
        };
        let batch = to_record_batch(&fields, &records).context("encode columnar rows")?;
        let writer = match &mut self.out {
            Some(writer) => writer,
            None => {
                let file = self
                    .file
                    .take()
                    .context("columnar destination already finished")?;
                let props = WriterProperties::builder().build();
                let writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
                    .context("create columnar writer")?;
                self.out.insert(writer)
            }
        };
        writer.write(&batch).context("write columnar row group")?;
        Ok(())
    }

    /// Close the current row group and sync file data to disk.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = &mut self.out {
            writer.flush().context("flush columnar row group")?;
        }
        self.sync.sync_data().context("sync destination")?;
        Ok(())
    }

    /// Write the file footer and sync. Until this runs the file cannot be
    /// read back.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.out.take() {
            writer.close().context("finalize columnar file")?;
        }
        self.sync.sync_data().context("sync destination")?;
        Ok(())
    }
}

/// Read a whole columnar file into memory. Used to recover the committed
/// prefix of a destination when resuming.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or decoded; in particular a
/// file missing its footer (a hard-killed run) is unreadable.
pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let mut reader = RecordReader::open(path, 64 * 1024, 0)?;
    let mut out = Vec::new();
    while let Some(record) = reader.next_record()? {
        out.push(record);
    }
    Ok(out)
}

/// Write `records` as one complete columnar file.
///
/// # Errors
///
/// Returns an error on schema inference, encoding, or write failure.
pub fn write_records(path: &Path, records: &[Record]) -> Result<()> {
    let mut writer = RecordWriter::create(path)?;
    writer.write_rows(records)?;
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(fields: &[(&str, serde_json::Value)]) -> Record {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn sample_rows(range: std::ops::Range<i64>) -> Vec<Record> {
        range
            .map(|i| rec(&[("id", json!(i)), ("name", json!(format!("row-{i}")))]))
            .collect()
    }

    #[test]
    fn row_groups_written_across_commits_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");

        let mut writer = RecordWriter::create(&path).unwrap();
        writer.write_rows(&sample_rows(0..5)).unwrap();
        writer.flush().unwrap();
        writer.write_rows(&sample_rows(5..8)).unwrap();
        writer.finish().unwrap();

        let rows = read_records(&path).unwrap();
        assert_eq!(rows.len(), 8);
        assert_eq!(rows[0].get("id"), Some(&json!(0)));
        assert_eq!(rows[7].get("name"), Some(&json!("row-7")));
    }

    #[test]
    fn reader_skips_a_row_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.parquet");
        write_records(&path, &sample_rows(0..10)).unwrap();

        let mut reader = RecordReader::open(&path, 4, 6).unwrap();
        let first = reader.next_record().unwrap().unwrap();
        assert_eq!(first.get("id"), Some(&json!(6)));
        let mut remaining = 1;
        while reader.next_record().unwrap().is_some() {
            remaining += 1;
        }
        assert_eq!(remaining, 4);
    }
}

//! Destination files, durable commits, and ordered reassembly.
//!
//! The writer is the single owner of every destination file and of the
//! checkpoint store. A batch is committed by appending its results, flushing
//! and syncing the touched destinations, and only then advancing the
//! checkpoint, so the checkpoint never gets ahead of durable output.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::{Format, JobConfig};
use crate::record::ResultBatch;
use crate::stats::Progress;
use anyhow::{bail, Context, Result};
use crossbeam_channel::Receiver;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

enum Sink {
    Jsonl {
        writer: BufWriter<File>,
        sync: File,
    },
    #[cfg(feature = "io-csv")]
    Csv {
        writer: csv::Writer<File>,
        sync: File,
        headers: Option<Vec<String>>,
    },
    #[cfg(feature = "io-parquet")]
    Parquet {
        writer: crate::io::parquet::RecordWriter,
        pending: Vec<crate::record::Record>,
    },
}

/// One open output file.
pub struct Destination {
    sink: Sink,
}

impl Destination {
    /// Open (or, when resuming, reopen for append) one destination.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory or the file cannot be
    /// created, or an existing header cannot be read back on resume.
    pub fn open(path: &Path, format: Format, resume: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("mkdir -p {}", parent.display()))?;
            }
        }
        // Columnar files cannot be appended to, so resume rewrites the
        // committed prefix recovered from the finished file.
        #[cfg(feature = "io-parquet")]
        if format == Format::Parquet {
            // A zero-length file is a destination that never got a row; only
            // a non-empty file carries a committed prefix to recover.
            let has_rows = resume
                && path.exists()
                && std::fs::metadata(path)
                    .with_context(|| format!("stat destination {}", path.display()))?
                    .len()
                    > 0;
            let prefix = if has_rows {
                crate::io::parquet::read_records(path)
                    .with_context(|| format!("recover committed rows of {}", path.display()))?
            } else {
                Vec::new()
            };
            let mut writer = crate::io::parquet::RecordWriter::create(path)?;
            if !prefix.is_empty() {
                writer.write_rows(&prefix)?;
                writer.flush()?;
            }
            return Ok(Self {
                sink: Sink::Parquet {
                    writer,
                    pending: Vec::new(),
                },
            });
        }
        #[cfg(feature = "io-csv")]
        let existing_headers = if format == Format::Csv && resume && path.exists() {
            read_existing_headers(path)?
        } else {
            None
        };

        let file = if resume {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open destination {}", path.display()))?
        } else {
            File::create(path)
                .with_context(|| format!("create destination {}", path.display()))?
        };
        let sync = file
            .try_clone()
            .with_context(|| format!("clone handle for {}", path.display()))?;

        let sink = match format {
            Format::Jsonl => Sink::Jsonl {
                writer: BufWriter::new(file),
                sync,
            },
            #[cfg(feature = "io-csv")]
            Format::Csv => Sink::Csv {
                writer: csv::WriterBuilder::new()
                    .has_headers(false)
                    .from_writer(file),
                sync,
                headers: existing_headers,
            },
            #[cfg(feature = "io-parquet")]
            Format::Parquet => unreachable!("columnar destinations are built above"),
        };
        Ok(Self { sink })
    }

    /// Append one record without flushing.
    pub fn append(&mut self, record: &crate::record::Record) -> Result<()> {
        match &mut self.sink {
            Sink::Jsonl { writer, .. } => crate::io::jsonl::write_record(writer, record),
            #[cfg(feature = "io-csv")]
            Sink::Csv {
                writer, headers, ..
            } => {
                if headers.is_none() {
                    // The first record of the destination fixes the header.
                    let derived: Vec<String> = record.keys().cloned().collect();
                    writer
                        .write_record(&derived)
                        .context("write header row")?;
                    *headers = Some(derived);
                }
                let names = headers.as_deref().unwrap_or_default();
                let row = crate::io::csv::row_from_record(names, record);
                writer.write_record(&row).context("write output row")?;
                Ok(())
            }
            #[cfg(feature = "io-parquet")]
            Sink::Parquet { pending, .. } => {
                // Columnar rows are encoded a whole commit at a time.
                pending.push(record.clone());
                Ok(())
            }
        }
    }

    /// Flush buffered rows and sync file data to disk.
    pub fn commit(&mut self) -> Result<()> {
        match &mut self.sink {
            Sink::Jsonl { writer, sync } => {
                writer.flush().context("flush destination")?;
                sync.sync_data().context("sync destination")?;
            }
            #[cfg(feature = "io-csv")]
            Sink::Csv { writer, sync, .. } => {
                writer.flush().context("flush destination")?;
                sync.sync_data().context("sync destination")?;
            }
            #[cfg(feature = "io-parquet")]
            Sink::Parquet { writer, pending } => {
                writer.write_rows(pending)?;
                pending.clear();
                writer.flush()?;
            }
        }
        Ok(())
    }

    /// Final commit after the last batch. For columnar output this writes the
    /// file footer; the other formats just flush and sync.
    pub fn finish(&mut self) -> Result<()> {
        self.commit()?;
        #[cfg(feature = "io-parquet")]
        if let Sink::Parquet { writer, .. } = &mut self.sink {
            writer.finish()?;
        }
        Ok(())
    }
}

#[cfg(feature = "io-csv")]
fn read_existing_headers(path: &Path) -> Result<Option<Vec<String>>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("reopen destination {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("read header of {}", path.display()))?;
    if headers.is_empty() {
        return Ok(None);
    }
    Ok(Some(headers.iter().map(str::to_string).collect()))
}

/// Tracks which batch sequences are durably written and derives the
/// checkpoint high-water mark.
///
/// A checkpoint may only describe a contiguous committed prefix, so
/// out-of-order commits are held back until every earlier sequence lands.
pub struct CommitTracker {
    next: u64,
    done: BTreeMap<u64, (u64, u64)>,
}

impl CommitTracker {
    pub fn new(start_sequence: u64) -> Self {
        Self {
            next: start_sequence,
            done: BTreeMap::new(),
        }
    }

    /// Record one committed batch; returns a new checkpoint when the
    /// contiguous prefix advanced.
    pub fn commit(&mut self, sequence: u64, end_offset: u64, rows_consumed: u64) -> Option<Checkpoint> {
        self.done.insert(sequence, (end_offset, rows_consumed));
        let mut latest = None;
        while let Some((offset, rows)) = self.done.remove(&self.next) {
            latest = Some(Checkpoint::new(self.next, offset, rows));
            self.next += 1;
        }
        latest
    }

    pub fn next_expected(&self) -> u64 {
        self.next
    }

    /// Committed batches still waiting on an earlier sequence.
    pub fn pending(&self) -> usize {
        self.done.len()
    }
}

/// Consumes result batches, writes them out, and advances the checkpoint.
pub struct Reassembler {
    destinations: Vec<Destination>,
    keep_order: bool,
    tracker: CommitTracker,
    store: CheckpointStore,
    progress: Arc<Progress>,
}

impl Reassembler {
    /// Open all destinations and position the commit tracker after the
    /// resumed prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if any destination cannot be opened.
    pub fn new(
        config: &JobConfig,
        store: CheckpointStore,
        resume: Option<&Checkpoint>,
        progress: Arc<Progress>,
    ) -> Result<Self> {
        let resuming = resume.is_some();
        let mut destinations = Vec::with_capacity(config.outputs.len());
        for path in &config.outputs {
            destinations.push(Destination::open(path, config.format, resuming)?);
        }
        let start_sequence = resume.map(|c| c.last_committed_sequence + 1).unwrap_or(0);
        Ok(Self {
            destinations,
            keep_order: config.keep_order,
            tracker: CommitTracker::new(start_sequence),
            store,
            progress,
        })
    }

    /// Drain the results channel until every sender hangs up.
    ///
    /// # Errors
    ///
    /// Returns an error on any write, sync, or checkpoint failure, or when
    /// the channel closes with batches still missing from the sequence.
    pub fn run(mut self, results: Receiver<ResultBatch>) -> Result<()> {
        if self.keep_order {
            self.run_ordered(results)?;
        } else {
            self.run_streaming(results)?;
        }
        for destination in &mut self.destinations {
            destination.finish()?;
        }
        Ok(())
    }

    fn run_streaming(&mut self, results: Receiver<ResultBatch>) -> Result<()> {
        while let Ok(batch) = results.recv() {
            self.commit_batch(batch)?;
        }
        self.check_drained()
    }

    fn run_ordered(&mut self, results: Receiver<ResultBatch>) -> Result<()> {
        let mut held: BTreeMap<u64, ResultBatch> = BTreeMap::new();
        while let Ok(batch) = results.recv() {
            held.insert(batch.sequence, batch);
            while let Some(ready) = held.remove(&self.tracker.next_expected()) {
                self.commit_batch(ready)?;
            }
        }
        if !held.is_empty() {
            bail!(
                "results channel closed with {} batch(es) held back waiting for sequence {}",
                held.len(),
                self.tracker.next_expected()
            );
        }
        self.check_drained()
    }

    fn check_drained(&self) -> Result<()> {
        if self.tracker.pending() > 0 {
            bail!(
                "results channel closed with a gap before sequence {}",
                self.tracker.next_expected()
            );
        }
        Ok(())
    }

    fn commit_batch(&mut self, batch: ResultBatch) -> Result<()> {
        let mut counts = vec![0u64; self.destinations.len()];
        for routed in &batch.results {
            let Some(destination) = self.destinations.get_mut(routed.destination) else {
                bail!(
                    "destination index {} out of range ({} configured)",
                    routed.destination,
                    self.destinations.len()
                );
            };
            destination.append(&routed.record)?;
            counts[routed.destination] += 1;
        }
        for (index, count) in counts.iter().enumerate() {
            if *count > 0 {
                self.destinations[index].commit()?;
            }
        }
        for (index, count) in counts.into_iter().enumerate() {
            if count > 0 {
                self.progress.record_commit(index, count);
            }
        }
        if let Some(checkpoint) = self.tracker.commit(
            batch.sequence,
            batch.span.end_offset,
            batch.rows_consumed,
        ) {
            self.store.save(&checkpoint)?;
            debug!(
                sequence = checkpoint.last_committed_sequence,
                offset = checkpoint.source_offset,
                "checkpoint advanced"
            );
        }
        Ok(())
    }
}

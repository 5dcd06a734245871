//! Persisted progress markers enabling resume without reprocessing.
//!
//! One checkpoint file exists per run configuration, keyed by the primary
//! destination path and stored next to it. The invariant the rest of the
//! engine upholds: a checkpoint never advances past a batch whose output is
//! not yet durably written.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Progress of a run: the last fully committed batch and how far into the
/// input it reached.
///
/// `rows_consumed` is the physical row count behind `source_offset`; formats
/// that cannot seek by byte offset resume by skipping that many rows instead.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub last_committed_sequence: u64,
    pub source_offset: u64,
    pub rows_consumed: u64,
    checksum: String,
}

impl Checkpoint {
    pub fn new(last_committed_sequence: u64, source_offset: u64, rows_consumed: u64) -> Self {
        Self {
            last_committed_sequence,
            source_offset,
            rows_consumed,
            checksum: checksum_of(last_committed_sequence, source_offset, rows_consumed),
        }
    }

    fn verify(&self) -> Result<()> {
        let expected = checksum_of(
            self.last_committed_sequence,
            self.source_offset,
            self.rows_consumed,
        );
        if self.checksum != expected {
            return Err(anyhow!("checkpoint integrity check failed: checksum mismatch"));
        }
        Ok(())
    }
}

fn checksum_of(sequence: u64, offset: u64, rows: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{sequence}:{offset}:{rows}").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Loads, saves, and clears the checkpoint file for one run configuration.
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Locate the checkpoint adjacent to the primary destination
    /// (`<output>.checkpoint`).
    pub fn for_destination(primary_output: &Path) -> Self {
        let mut name = primary_output
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".checkpoint");
        Self {
            path: primary_output.with_file_name(name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted checkpoint, if any.
    ///
    /// A missing file is a clean start and returns `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed, or
    /// fails its integrity check. Resuming from a torn checkpoint risks
    /// silent data loss, so this is fatal.
    pub fn load(&self) -> Result<Option<Checkpoint>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("read checkpoint {}", self.path.display()))?;
        let checkpoint: Checkpoint = serde_json::from_str(&raw)
            .with_context(|| format!("parse checkpoint {}", self.path.display()))?;
        checkpoint.verify()?;
        Ok(Some(checkpoint))
    }

    /// Persist a checkpoint atomically.
    ///
    /// Writes to a temp file, syncs, then renames over the target so a
    /// concurrent `load` never observes a torn write.
    ///
    /// # Errors
    ///
    /// Returns an error if the temp file cannot be written, synced, or
    /// renamed into place.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let tmp = self.path.with_extension("checkpoint.tmp");
        let mut file = File::create(&tmp)
            .with_context(|| format!("create checkpoint temp {}", tmp.display()))?;
        let encoded = serde_json::to_string(checkpoint).context("serialize checkpoint")?;
        file.write_all(encoded.as_bytes())
            .context("write checkpoint")?;
        file.sync_all().context("sync checkpoint to disk")?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename checkpoint into {}", self.path.display()))?;
        Ok(())
    }

    /// Remove the checkpoint after a fully completed run.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("remove checkpoint {}", self.path.display()))?;
        }
        Ok(())
    }
}

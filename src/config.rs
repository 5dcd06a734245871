//! Job configuration and pre-start validation.

use crate::error::PipelineError;
use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Encoding of a record file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// Newline-delimited JSON, one object per line.
    Jsonl,
    /// Tabular rows with a header line.
    #[cfg(feature = "io-csv")]
    Csv,
    /// Columnar files read and written by row group.
    #[cfg(feature = "io-parquet")]
    Parquet,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jsonl" => Ok(Format::Jsonl),
            #[cfg(feature = "io-csv")]
            "csv" => Ok(Format::Csv),
            #[cfg(feature = "io-parquet")]
            "parquet" => Ok(Format::Parquet),
            other => Err(format!("unsupported format: {other}")),
        }
    }
}

/// Everything one run needs: where to read, where to write, how to process.
///
/// Construct with [`JobConfig::new`] and adjust the public knobs before
/// handing the config to [`Pipeline`](crate::pipeline::Pipeline).
#[derive(Clone, Debug)]
pub struct JobConfig {
    pub input: PathBuf,
    pub outputs: Vec<PathBuf>,
    pub stats_path: PathBuf,
    pub format: Format,
    /// Number of parallel worker units.
    pub workers: usize,
    /// Records per batch; the unit of parallel dispatch.
    pub batch_size: usize,
    /// Release result batches strictly in input order.
    pub keep_order: bool,
    /// Wall-clock interval between progress snapshots.
    pub report_interval: Duration,
}

impl JobConfig {
    pub const DEFAULT_WORKERS: usize = 4;
    pub const DEFAULT_BATCH_SIZE: usize = 1000;
    pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

    pub fn new(
        input: impl Into<PathBuf>,
        outputs: Vec<PathBuf>,
        stats_path: impl Into<PathBuf>,
        format: Format,
    ) -> Self {
        Self {
            input: input.into(),
            outputs,
            stats_path: stats_path.into(),
            format,
            workers: Self::DEFAULT_WORKERS,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            keep_order: false,
            report_interval: Self::DEFAULT_REPORT_INTERVAL,
        }
    }

    /// Capacity of the work and completion channels.
    ///
    /// This caps the number of in-flight batches, which is the primary
    /// flow-control mechanism: the source blocks once the cap is reached, so
    /// memory stays bounded regardless of input size.
    pub fn channel_capacity(&self) -> usize {
        self.workers * 2
    }

    /// Reject invalid option combinations before any I/O happens.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] naming the offending option.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.outputs.is_empty() {
            return Err(PipelineError::Config(
                "at least one output destination is required".into(),
            ));
        }
        let unique: HashSet<&PathBuf> = self.outputs.iter().collect();
        if unique.len() != self.outputs.len() {
            return Err(PipelineError::Config(
                "output destinations must be distinct paths".into(),
            ));
        }
        if self.workers == 0 {
            return Err(PipelineError::Config("worker count must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::Config("batch size must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> JobConfig {
        JobConfig::new(
            "in.jsonl",
            vec![PathBuf::from("out.jsonl")],
            "stats.json",
            Format::Jsonl,
        )
    }

    #[test]
    fn defaults_match_contract() {
        let config = base();
        assert_eq!(config.workers, 4);
        assert_eq!(config.batch_size, 1000);
        assert!(!config.keep_order);
        assert_eq!(config.report_interval, Duration::from_secs(10));
        assert_eq!(config.channel_capacity(), 8);
    }

    #[test]
    fn rejects_empty_outputs() {
        let mut config = base();
        config.outputs.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_outputs() {
        let mut config = base();
        config.outputs.push(PathBuf::from("out.jsonl"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_workers_and_zero_batch() {
        let mut config = base();
        config.workers = 0;
        assert!(config.validate().is_err());

        let mut config = base();
        config.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!("JSONL".parse::<Format>().unwrap(), Format::Jsonl);
        #[cfg(feature = "io-parquet")]
        assert_eq!("Parquet".parse::<Format>().unwrap(), Format::Parquet);
        assert!("avro".parse::<Format>().is_err());
    }
}

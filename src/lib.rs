//! Parallel batch processing for record-oriented files.
//!
//! Records stream in from a JSONL, CSV, or Parquet file, travel in
//! sequence-numbered batches through a pool of worker units running a
//! pluggable per-record [`Transform`], and land in one or more destination
//! files. Runs checkpoint
//! their progress next to the primary destination and resume from it after an
//! interruption. Result batches are released either as they complete
//! (streaming) or strictly in input order.
//!
//! # Quick start
//!
//! ```no_run
//! use rowflow::{factory_for, Format, JobConfig, Pipeline};
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = JobConfig::new(
//!     "input.jsonl",
//!     vec![PathBuf::from("passed.jsonl"), PathBuf::from("failed.jsonl")],
//!     "stats.json",
//!     Format::Jsonl,
//! );
//! config.keep_order = true;
//!
//! let factory = factory_for("score_filter").ok_or("unknown transform")?;
//! let summary = Pipeline::new(config, factory).run()?;
//! println!("processed {} records", summary.total_processed);
//! # Ok(())
//! # }
//! ```
//!
//! Custom processing plugs in through the [`Transform`] trait; each worker
//! unit gets its own instance from a [`TransformFactory`], so implementations
//! can keep mutable state without locking.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod record;
pub mod source;
pub mod stats;
pub mod transform;
mod worker;
pub mod writer;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use config::{Format, JobConfig};
pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineState, RunOutcome, RunSummary};
pub use record::{Batch, Record, ResultBatch, Routed, SourceSpan};
pub use stats::{Progress, Stats};
pub use transform::{builtin_names, factory_for, Transform, TransformFactory};

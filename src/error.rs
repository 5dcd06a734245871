//! Fatal error taxonomy surfaced by the pipeline coordinator.
//!
//! Per-record failures (an unparsable input row, a transform refusing one
//! record) are not represented here: they are counted and logged where they
//! happen and never abort a run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid option combination, rejected before any I/O happens.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Input unreadable, destination unwritable, or a failed commit.
    #[error("I/O failure")]
    Io(#[source] anyhow::Error),

    /// Checkpoint file unreadable, unwritable, or failed its integrity check.
    #[error("checkpoint failure")]
    Checkpoint(#[source] anyhow::Error),

    /// A worker unit crashed or hit an unrecoverable error.
    #[error("worker unit failed")]
    Unit(#[source] anyhow::Error),
}

impl PipelineError {
    /// Short category name printed for the operator on exit.
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "config",
            PipelineError::Io(_) => "io",
            PipelineError::Checkpoint(_) => "checkpoint",
            PipelineError::Unit(_) => "worker",
        }
    }
}

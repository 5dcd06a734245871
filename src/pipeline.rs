//! The coordinator: wires source, workers, writer, and reporter together.
//!
//! Thread layout per run: one source feeder, N worker units, one writer, one
//! stats reporter. Batches flow through bounded channels, so the feeder
//! blocks instead of buffering an unbounded backlog. Shutdown is cooperative:
//! the feeder checks a flag between batches, stops feeding, and every stage
//! drains to completion before the run returns.

use crate::checkpoint::CheckpointStore;
use crate::config::JobConfig;
use crate::error::PipelineError;
use crate::record::Batch;
use crate::source::RecordSource;
use crate::stats::{self, Progress, Stats, StatsReporter, WorkerStatsTable};
use crate::transform::TransformFactory;
use crate::worker;
use crate::writer::Reassembler;
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

/// Lifecycle of one run, observable while it executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Initializing,
    Running,
    Draining,
    Completed,
    Failed,
}

/// How a run ended when it did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Input exhausted; checkpoint cleared.
    Completed,
    /// Shutdown requested; checkpoint kept for a later resume.
    Interrupted,
}

/// Final numbers of a successful (completed or interrupted) run.
#[derive(Debug)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub total_processed: u64,
    pub total_output: u64,
    pub output_per_destination: Vec<u64>,
    pub processing_time_seconds: f64,
    /// Folded transform counters.
    pub stats: Stats,
}

/// One configured run of the engine.
pub struct Pipeline {
    config: JobConfig,
    factory: TransformFactory,
    shutdown: Arc<AtomicBool>,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(config: JobConfig, factory: TransformFactory) -> Self {
        Self {
            config,
            factory,
            shutdown: Arc::new(AtomicBool::new(false)),
            state: PipelineState::Initializing,
        }
    }

    /// Flag observed by the feeder between batches. Set it (for example from
    /// a signal handler) to request a graceful drain.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Execute the run to completion or graceful interruption.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] categorizing the first fatal failure:
    /// configuration, I/O, checkpoint, or worker.
    pub fn run(&mut self) -> Result<RunSummary, PipelineError> {
        match self.execute() {
            Ok(summary) => {
                self.state = PipelineState::Completed;
                Ok(summary)
            }
            Err(err) => {
                self.state = PipelineState::Failed;
                let chain = format!("{err:#}");
                error!(category = err.category(), error = %chain, "run failed");
                Err(err)
            }
        }
    }

    fn execute(&mut self) -> Result<RunSummary, PipelineError> {
        self.config.validate()?;

        let store = CheckpointStore::for_destination(&self.config.outputs[0]);
        let resume = store.load().map_err(PipelineError::Checkpoint)?;

        let progress = Arc::new(Progress::new(self.config.outputs.len()));
        let table = Arc::new(WorkerStatsTable::new(self.config.workers));

        let source = RecordSource::open(&self.config, resume.as_ref(), Arc::clone(&progress))
            .map_err(PipelineError::Io)?;
        let reassembler = Reassembler::new(
            &self.config,
            store.clone(),
            resume.as_ref(),
            Arc::clone(&progress),
        )
        .map_err(PipelineError::Io)?;

        let capacity = self.config.channel_capacity();
        let (work_tx, work_rx) = crossbeam_channel::bounded::<Batch>(capacity);
        let (result_tx, result_rx) = crossbeam_channel::bounded(capacity);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        self.state = PipelineState::Running;
        info!(
            input = %self.config.input.display(),
            outputs = self.config.outputs.len(),
            workers = self.config.workers,
            batch_size = self.config.batch_size,
            keep_order = self.config.keep_order,
            resuming = resume.is_some(),
            "pipeline starting"
        );

        let spawn_failed = |e: std::io::Error| PipelineError::Io(e.into());

        // The flag doubles as an abort signal: a failing stage sets it so the
        // feeder stops producing and the run winds down quickly.
        let abort = Arc::clone(&self.shutdown);

        let feeder = {
            let shutdown = Arc::clone(&self.shutdown);
            thread::Builder::new()
                .name("rowflow-source".into())
                .spawn(move || feed(source, work_tx, shutdown))
                .map_err(spawn_failed)?
        };

        let destinations = self.config.outputs.len();
        let mut units = Vec::with_capacity(self.config.workers);
        for unit in 0..self.config.workers {
            let work = work_rx.clone();
            let results = result_tx.clone();
            let transform = (self.factory)();
            let table = Arc::clone(&table);
            let progress = Arc::clone(&progress);
            let abort = Arc::clone(&abort);
            let handle = thread::Builder::new()
                .name(format!("rowflow-unit-{unit}"))
                .spawn(move || {
                    let outcome =
                        worker::run_unit(unit, destinations, transform, work, results, table, progress);
                    if outcome.is_err() {
                        abort.store(true, Ordering::SeqCst);
                    }
                    outcome
                })
                .map_err(spawn_failed)?;
            units.push(handle);
        }
        drop(work_rx);
        drop(result_tx);

        let writer = {
            let abort = Arc::clone(&abort);
            thread::Builder::new()
                .name("rowflow-writer".into())
                .spawn(move || {
                    let outcome = reassembler.run(result_rx);
                    if outcome.is_err() {
                        abort.store(true, Ordering::SeqCst);
                    }
                    outcome
                })
                .map_err(spawn_failed)?
        };

        let reporter = {
            let reporter = StatsReporter::new(
                Arc::clone(&progress),
                Arc::clone(&table),
                self.config.report_interval,
            );
            thread::Builder::new()
                .name("rowflow-stats".into())
                .spawn(move || reporter.run(stop_rx))
                .map_err(spawn_failed)?
        };

        let fed = feeder
            .join()
            .map_err(|_| PipelineError::Io(anyhow!("source thread panicked")))?;

        // Feeding is over; the remaining stages are emptying their channels.
        self.state = PipelineState::Draining;

        let mut unit_error: Option<anyhow::Error> = None;
        for (unit, handle) in units.into_iter().enumerate() {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    unit_error.get_or_insert(err.context(format!("unit {unit}")));
                }
                Err(_) => {
                    unit_error.get_or_insert(anyhow!("unit {unit} panicked"));
                }
            }
        }

        let written = writer
            .join()
            .map_err(|_| PipelineError::Io(anyhow!("writer thread panicked")))?;

        let _ = stop_tx.send(());
        let _ = reporter.join();

        if let Some(err) = unit_error {
            return Err(PipelineError::Unit(err));
        }
        written.map_err(PipelineError::Io)?;
        let exhausted = fed.map_err(PipelineError::Io)?;

        let elapsed = progress.elapsed();
        let custom = table.fold();
        let report = stats::final_report(&custom, &progress, elapsed);
        stats::write_stats_file(&self.config.stats_path, &report).map_err(PipelineError::Io)?;

        let outcome = if exhausted {
            store.clear().map_err(PipelineError::Checkpoint)?;
            RunOutcome::Completed
        } else {
            RunOutcome::Interrupted
        };

        let summary = RunSummary {
            outcome,
            total_processed: progress.records_read(),
            total_output: progress.total_committed(),
            output_per_destination: progress.committed_per_destination(),
            processing_time_seconds: elapsed.as_secs_f64(),
            stats: custom,
        };
        info!(
            outcome = ?summary.outcome,
            processed = summary.total_processed,
            output = summary.total_output,
            seconds = summary.processing_time_seconds,
            "pipeline finished"
        );
        Ok(summary)
    }
}

/// Read batches and push them downstream until the input ends or shutdown is
/// requested. Returns whether the input was fully exhausted.
fn feed(mut source: RecordSource, work: Sender<Batch>, shutdown: Arc<AtomicBool>) -> Result<bool> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            info!("shutdown requested, draining in-flight batches");
            return Ok(false);
        }
        match source.next_batch().context("read input")? {
            Some(batch) => {
                if work.send(batch).is_err() {
                    // All units gone; their own errors surface at join time.
                    return Ok(false);
                }
            }
            None => return Ok(true),
        }
    }
}

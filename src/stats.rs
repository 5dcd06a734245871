//! Counter maps, process-wide progress counters, and the periodic reporter.
//!
//! Each worker's transform owns a private [`Stats`]; the engine folds them by
//! per-key summation. Process-wide gauges (elapsed time, rates) are computed
//! only here, never by workers.

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

/// A mapping from counter name to numeric value.
///
/// `merge` sums per key and treats keys absent on one side as zero, so
/// folding any number of worker stats is associative and commutative.
#[derive(Clone, Debug, Default)]
pub struct Stats {
    counters: HashMap<String, f64>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a counter exists, so it shows up in reports even at zero.
    pub fn zero(&mut self, key: &str) {
        self.counters.entry(key.to_string()).or_insert(0.0);
    }

    pub fn incr(&mut self, key: &str, by: f64) {
        *self.counters.entry(key.to_string()).or_insert(0.0) += by;
    }

    pub fn get(&self, key: &str) -> f64 {
        self.counters.get(key).copied().unwrap_or(0.0)
    }

    pub fn merge(&mut self, other: &Stats) {
        for (key, value) in &other.counters {
            *self.counters.entry(key.clone()).or_insert(0.0) += value;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Render counters as a JSON object with stable key order, keeping
    /// integral values as JSON integers.
    pub fn to_json(&self) -> Map<String, Value> {
        let mut keys: Vec<&String> = self.counters.keys().collect();
        keys.sort();
        let mut out = Map::new();
        for key in keys {
            out.insert(key.clone(), number_value(self.counters[key]));
        }
        out
    }
}

fn number_value(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < 9.0e15 {
        json!(v as i64)
    } else {
        json!(v)
    }
}

/// Process-wide monotonic counters observed by the reporter.
///
/// Shared by the source (reads, parse errors), the workers (transform
/// errors), and the writer (per-destination commits).
#[derive(Debug)]
pub struct Progress {
    records_read: AtomicU64,
    parse_errors: AtomicU64,
    transform_errors: AtomicU64,
    committed: Vec<AtomicU64>,
    started: Instant,
}

impl Progress {
    pub fn new(destinations: usize) -> Self {
        Self {
            records_read: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            transform_errors: AtomicU64::new(0),
            committed: (0..destinations).map(|_| AtomicU64::new(0)).collect(),
            started: Instant::now(),
        }
    }

    pub fn record_read(&self) {
        self.records_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transform_error(&self) {
        self.transform_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self, destination: usize, rows: u64) {
        self.committed[destination].fetch_add(rows, Ordering::Relaxed);
    }

    pub fn records_read(&self) -> u64 {
        self.records_read.load(Ordering::Relaxed)
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    pub fn transform_errors(&self) -> u64 {
        self.transform_errors.load(Ordering::Relaxed)
    }

    pub fn committed_per_destination(&self) -> Vec<u64> {
        self.committed
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }

    pub fn total_committed(&self) -> u64 {
        self.committed_per_destination().iter().sum()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// One published stats snapshot per worker unit.
///
/// Workers overwrite their own slot after each batch; the reporter folds all
/// slots on demand. No worker ever touches another worker's slot.
#[derive(Debug)]
pub struct WorkerStatsTable {
    slots: Vec<Mutex<Stats>>,
}

impl WorkerStatsTable {
    pub fn new(workers: usize) -> Self {
        Self {
            slots: (0..workers).map(|_| Mutex::new(Stats::new())).collect(),
        }
    }

    pub fn publish(&self, worker: usize, stats: &Stats) {
        *self.slots[worker].lock().unwrap() = stats.clone();
    }

    /// Fold all worker snapshots by per-key summation.
    pub fn fold(&self) -> Stats {
        let mut out = Stats::new();
        for slot in &self.slots {
            out.merge(&slot.lock().unwrap());
        }
        out
    }
}

/// Periodic progress reporter, run on its own thread.
///
/// Emits one log line per interval with elapsed time, rate over the last
/// window, records consumed, and per-destination commits. Counters only ever
/// increase, so successive snapshots are monotonic.
pub struct StatsReporter {
    progress: std::sync::Arc<Progress>,
    table: std::sync::Arc<WorkerStatsTable>,
    interval: Duration,
}

impl StatsReporter {
    pub fn new(
        progress: std::sync::Arc<Progress>,
        table: std::sync::Arc<WorkerStatsTable>,
        interval: Duration,
    ) -> Self {
        Self {
            progress,
            table,
            interval,
        }
    }

    /// Tick until a message (or disconnect) arrives on `stop`.
    pub fn run(self, stop: Receiver<()>) {
        let ticker = crossbeam_channel::tick(self.interval);
        let mut last_tick = Instant::now();
        let mut last_output = 0u64;
        loop {
            crossbeam_channel::select! {
                recv(ticker) -> _ => {
                    let now = Instant::now();
                    let output = self.progress.total_committed();
                    let window = now.duration_since(last_tick).as_secs_f64();
                    let rate = if window > 0.0 {
                        (output - last_output) as f64 / window
                    } else {
                        0.0
                    };
                    let custom = self.table.fold();
                    info!(
                        elapsed_secs = self.progress.elapsed().as_secs_f64(),
                        rows_per_sec = rate,
                        processed = self.progress.records_read(),
                        output,
                        output_per_destination = ?self.progress.committed_per_destination(),
                        custom_stats = ?custom.to_json(),
                        "progress"
                    );
                    last_tick = now;
                    last_output = output;
                }
                recv(stop) -> _ => break,
            }
        }
    }
}

/// Build the final statistics document: the folded custom stats plus the
/// engine's standard fields.
pub fn final_report(custom: &Stats, progress: &Progress, elapsed: Duration) -> Value {
    let mut doc = custom.to_json();
    let total_processed = progress.records_read();
    let secs = elapsed.as_secs_f64();
    doc.insert("total_processed".into(), json!(total_processed));
    doc.insert("total_output".into(), json!(progress.total_committed()));
    doc.insert(
        "total_output_per_destination".into(),
        json!(progress.committed_per_destination()),
    );
    doc.insert("malformed_records".into(), json!(progress.parse_errors()));
    doc.insert("transform_errors".into(), json!(progress.transform_errors()));
    doc.insert("processing_time_seconds".into(), json!(secs));
    doc.insert(
        "average_speed_rows_per_second".into(),
        json!(if secs > 0.0 {
            total_processed as f64 / secs
        } else {
            0.0
        }),
    );
    Value::Object(doc)
}

/// Write the final statistics document as pretty JSON.
///
/// # Errors
///
/// Returns an error if the parent directory or the file cannot be written.
pub fn write_stats_file(path: &Path, doc: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("mkdir -p {}", parent.display()))?;
        }
    }
    let mut encoded = serde_json::to_string_pretty(doc).context("serialize stats")?;
    encoded.push('\n');
    std::fs::write(path, encoded).with_context(|| format!("write stats {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_sums_per_key_with_zero_identity() {
        let mut a = Stats::new();
        a.incr("passed", 3.0);
        a.incr("failed", 1.0);
        let mut b = Stats::new();
        b.incr("passed", 2.0);
        b.incr("skipped", 5.0);

        a.merge(&b);
        assert_eq!(a.get("passed"), 5.0);
        assert_eq!(a.get("failed"), 1.0);
        assert_eq!(a.get("skipped"), 5.0);
        assert_eq!(a.get("missing"), 0.0);
    }

    #[test]
    fn fold_equals_sum_of_worker_stats() {
        let table = WorkerStatsTable::new(3);
        for (worker, count) in [(0usize, 2.0), (1, 3.0), (2, 7.0)] {
            let mut stats = Stats::new();
            stats.incr("count", count);
            table.publish(worker, &stats);
        }
        assert_eq!(table.fold().get("count"), 12.0);
    }

    #[test]
    fn integral_counters_render_as_integers() {
        let mut stats = Stats::new();
        stats.incr("whole", 4.0);
        stats.incr("frac", 0.5);
        let doc = stats.to_json();
        assert_eq!(doc["whole"], json!(4));
        assert_eq!(doc["frac"], json!(0.5));
    }

    #[test]
    fn final_report_carries_standard_fields() {
        let progress = Progress::new(2);
        for _ in 0..10 {
            progress.record_read();
        }
        progress.record_commit(0, 6);
        progress.record_commit(1, 3);

        let mut custom = Stats::new();
        custom.incr("passed", 6.0);

        let doc = final_report(&custom, &progress, Duration::from_secs(2));
        assert_eq!(doc["total_processed"], json!(10));
        assert_eq!(doc["total_output"], json!(9));
        assert_eq!(doc["total_output_per_destination"], json!([6, 3]));
        assert_eq!(doc["processing_time_seconds"], json!(2.0));
        assert_eq!(doc["average_speed_rows_per_second"], json!(5.0));
        assert_eq!(doc["passed"], json!(6));
    }
}

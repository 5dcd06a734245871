//! Worker unit loop: batches in, result batches out.

use crate::record::{Batch, ResultBatch};
use crate::stats::{Progress, WorkerStatsTable};
use crate::transform::Transform;
use anyhow::{bail, Result};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use tracing::warn;

/// Run one worker unit until the work channel closes.
///
/// Per-record transform errors are counted and skipped; an out-of-range
/// destination aborts the unit since records would otherwise be lost
/// silently. The unit publishes its stats snapshot after every batch so the
/// reporter always folds recent numbers.
pub(crate) fn run_unit(
    unit: usize,
    destinations: usize,
    mut transform: Box<dyn Transform>,
    work: Receiver<Batch>,
    results: Sender<ResultBatch>,
    table: Arc<WorkerStatsTable>,
    progress: Arc<Progress>,
) -> Result<()> {
    while let Ok(batch) = work.recv() {
        let Batch {
            sequence,
            records,
            span,
            rows_consumed,
        } = batch;
        let mut routed = Vec::with_capacity(records.len());
        for record in records {
            match transform.process(record, destinations) {
                Ok(Some(result)) => {
                    if result.destination >= destinations {
                        bail!(
                            "transform routed to destination {} but only {} configured",
                            result.destination,
                            destinations
                        );
                    }
                    routed.push(result);
                }
                Ok(None) => {}
                Err(err) => {
                    progress.record_transform_error();
                    warn!(unit, sequence, error = %err, "transform failed on record");
                }
            }
        }
        table.publish(unit, transform.stats());
        let done = ResultBatch {
            sequence,
            results: routed,
            span,
            rows_consumed,
        };
        if results.send(done).is_err() {
            // Writer gone; nothing left to do.
            break;
        }
    }
    table.publish(unit, transform.stats());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Record, SourceSpan};
    use crate::transform::factory_for;
    use serde_json::json;

    fn batch(sequence: u64, ids: &[i64]) -> Batch {
        Batch {
            sequence,
            records: ids
                .iter()
                .map(|id| {
                    let mut r = Record::new();
                    r.insert("id".into(), json!(id));
                    r
                })
                .collect(),
            span: SourceSpan::default(),
            rows_consumed: 0,
        }
    }

    #[test]
    fn unit_preserves_batch_sequence_and_record_order() {
        let (work_tx, work_rx) = crossbeam_channel::unbounded();
        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        let table = Arc::new(WorkerStatsTable::new(1));
        let progress = Arc::new(Progress::new(1));

        work_tx.send(batch(0, &[1, 2, 3])).unwrap();
        work_tx.send(batch(1, &[4])).unwrap();
        drop(work_tx);

        let factory = factory_for("passthrough").unwrap();
        run_unit(0, 1, factory(), work_rx, result_tx, table.clone(), progress).unwrap();

        let first = result_rx.recv().unwrap();
        assert_eq!(first.sequence, 0);
        let ids: Vec<_> = first
            .results
            .iter()
            .map(|r| r.record.get("id").cloned().unwrap())
            .collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);

        assert_eq!(result_rx.recv().unwrap().sequence, 1);
        assert_eq!(table.fold().get("total_processed"), 4.0);
    }
}

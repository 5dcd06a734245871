use rowflow::{factory_for, Checkpoint, CheckpointStore, Format, JobConfig, Pipeline, RunOutcome};
use serde_json::{json, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

fn write_jsonl(path: &Path, records: &[Value]) {
    let mut file = fs::File::create(path).unwrap();
    for record in records {
        writeln!(file, "{record}").unwrap();
    }
}

fn config_in(dir: &Path) -> JobConfig {
    let mut config = JobConfig::new(
        dir.join("input.jsonl"),
        vec![PathBuf::from(dir.join("out.jsonl"))],
        dir.join("stats.json"),
        Format::Jsonl,
    );
    config.batch_size = 10;
    config.keep_order = true;
    config
}

#[test]
fn resume_continues_where_the_checkpoint_left_off() {
    let dir = tempfile::tempdir().unwrap();
    let records: Vec<Value> = (0..100).map(|i| json!({"id": i})).collect();
    write_jsonl(&dir.path().join("input.jsonl"), &records);

    let config = config_in(dir.path());

    // Simulate an interrupted run: the first four batches (40 records) are
    // already written and checkpointed.
    write_jsonl(&config.outputs[0], &records[..40]);
    let input_text = fs::read_to_string(&config.input).unwrap();
    let offset: u64 = input_text
        .lines()
        .take(40)
        .map(|l| l.len() as u64 + 1)
        .sum();
    let store = CheckpointStore::for_destination(&config.outputs[0]);
    store.save(&Checkpoint::new(3, offset, 40)).unwrap();

    let summary = Pipeline::new(config.clone(), factory_for("passthrough").unwrap())
        .run()
        .unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    // Only the remaining 60 records were processed this run.
    assert_eq!(summary.total_processed, 60);

    let output: Vec<Value> = fs::read_to_string(&config.outputs[0])
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(output, records);
    assert!(store.load().unwrap().is_none());
}

#[test]
fn rerun_after_completion_reprocesses_from_scratch() {
    let dir = tempfile::tempdir().unwrap();
    let records: Vec<Value> = (0..30).map(|i| json!({"id": i})).collect();
    write_jsonl(&dir.path().join("input.jsonl"), &records);

    let config = config_in(dir.path());
    for _ in 0..2 {
        let summary = Pipeline::new(config.clone(), factory_for("passthrough").unwrap())
            .run()
            .unwrap();
        assert_eq!(summary.total_processed, 30);

        let output: Vec<Value> = fs::read_to_string(&config.outputs[0])
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        // No checkpoint exists, so the second run truncates and rewrites.
        assert_eq!(output, records);
    }
}

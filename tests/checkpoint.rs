use rowflow::{Checkpoint, CheckpointStore};
use std::fs;
use std::path::PathBuf;

#[test]
fn checkpoint_sits_next_to_the_primary_destination() {
    let store = CheckpointStore::for_destination(&PathBuf::from("/data/out/passed.jsonl"));
    assert_eq!(
        store.path(),
        PathBuf::from("/data/out/passed.jsonl.checkpoint")
    );
}

#[test]
fn save_load_round_trip_and_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::for_destination(&dir.path().join("out.jsonl"));

    assert!(store.load().unwrap().is_none());

    let first = Checkpoint::new(4, 4096, 50);
    store.save(&first).unwrap();
    assert_eq!(store.load().unwrap(), Some(first));

    let second = Checkpoint::new(9, 9000, 110);
    store.save(&second).unwrap();
    assert_eq!(store.load().unwrap(), Some(second));
}

#[test]
fn corrupt_checkpoint_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::for_destination(&dir.path().join("out.jsonl"));

    fs::write(store.path(), "{ torn write").unwrap();
    assert!(store.load().is_err());

    // Valid JSON with a wrong checksum must also be rejected.
    let checkpoint = Checkpoint::new(2, 100, 10);
    let mut doc: serde_json::Value =
        serde_json::to_value(&checkpoint).unwrap();
    doc["source_offset"] = serde_json::json!(999);
    fs::write(store.path(), serde_json::to_string(&doc).unwrap()).unwrap();
    assert!(store.load().is_err());
}

#[test]
fn clear_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::for_destination(&dir.path().join("out.jsonl"));

    store.save(&Checkpoint::new(0, 10, 1)).unwrap();
    store.clear().unwrap();
    assert!(store.load().unwrap().is_none());
    store.clear().unwrap();
}

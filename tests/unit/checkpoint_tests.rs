/*!
 * Tests for the on-disk checkpoint format
 */

use anyhow::Result;
use booktrans::errors::PipelineError;
use booktrans::translation::CheckpointStore;
use crate::common;

/// Recorded chunks are stored under string indices next to `last_chunk`
#[test]
fn test_record_shouldWriteIndexKeyedChunks() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = temp_dir.path().join(".checkpoint.json");

    let mut store = CheckpointStore::reset(&path, "abc", 3)?;
    store.record(0, "перший")?;
    store.record(1, "другий")?;

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(json["chunks"]["0"], "перший");
    assert_eq!(json["chunks"]["1"], "другий");
    assert_eq!(json["last_chunk"], 1);
    assert_eq!(json["fingerprint"], "abc");
    assert_eq!(json["total_chunks"], 3);

    let reopened = CheckpointStore::open(&path)?;
    assert_eq!(reopened.state().next_index(), 2);
    Ok(())
}

/// Files written by older workers without a fingerprint are readable
#[test]
fn test_open_withLegacyFile_shouldLoadChunks() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = common::create_test_file(
        temp_dir.path(),
        ".checkpoint.json",
        r#"{"chunks": {"0": "X", "1": "Y"}, "last_chunk": 1}"#,
    )?;

    let mut store = CheckpointStore::open(&path)?;
    assert_eq!(store.state().chunks.get(&1).map(String::as_str), Some("Y"));
    assert_eq!(store.state().fingerprint, None);

    store.verify("fresh", 5)?;
    assert_eq!(store.state().fingerprint.as_deref(), Some("fresh"));
    Ok(())
}

/// A legacy checkpoint longer than the chunk sequence cannot be resumed
#[test]
fn test_verify_withLegacyFileBeyondChunks_shouldMismatch() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = common::create_test_file(
        temp_dir.path(),
        ".checkpoint.json",
        r#"{"chunks": {"0": "X", "1": "Y", "2": "Z"}, "last_chunk": 2}"#,
    )?;

    let mut store = CheckpointStore::open(&path)?;
    let result = store.verify("fresh", 2);
    assert!(matches!(result, Err(PipelineError::ConfigMismatch { .. })));
    Ok(())
}

/// A truncated file is corrupt rather than silently empty
#[test]
fn test_open_withTruncatedFile_shouldBeCorrupt() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = common::create_test_file(temp_dir.path(), ".checkpoint.json", r#"{"chunks": {"0": "X""#)?;

    assert!(matches!(
        CheckpointStore::open(&path),
        Err(PipelineError::CheckpointCorrupt { .. })
    ));
    Ok(())
}

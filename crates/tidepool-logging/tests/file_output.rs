//! End-to-end check of JSONL file output
//!
//! Installing a global subscriber can only happen once per process, so this
//! file holds a single test.

use tempfile::TempDir;
use tidepool_logging::{FileConfig, RotationStrategy, TidepoolSubscriberBuilder};

#[test]
fn test_events_written_as_jsonl() {
    let temp_dir = TempDir::new().unwrap();
    let file_config = FileConfig {
        directory: temp_dir.path().to_path_buf(),
        prefix: "emitter".to_string(),
        rotation: RotationStrategy::Never,
        max_files: None,
    };

    let guard = TidepoolSubscriberBuilder::new()
        .with_console(false)
        .with_level("info")
        .with_file_output(file_config)
        .try_init()
        .unwrap();
    assert!(guard.is_some());

    tracing::info!(partition = "temperature", written = 3, "Flushed partition");
    tracing::debug!("filtered out");

    // Dropping the guard flushes the background writer
    drop(guard);

    let contents = std::fs::read_to_string(temp_dir.path().join("emitter.log")).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 1);

    let event: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(event["message"], "Flushed partition");
    assert_eq!(event["partition"], "temperature");
    assert_eq!(event["written"], 3);
    assert_eq!(event["level"], "INFO");

    // A second install is rejected
    assert!(TidepoolSubscriberBuilder::new().try_init().is_err());
}

//! End-to-end tests for the CLI commands against real partition files

use std::time::Duration;

use tempfile::TempDir;
use tidepool_cli::commands;
use tidepool_cli::config::TidepoolConfig;
use tidepool_emitter::PersistenceState;
use tidepool_storage::PartitionId;

fn config_for(data_dir: &std::path::Path) -> TidepoolConfig {
    let text = format!(
        r#"
[settings]
data_dir = "{}"

[schema]
name = "readings"

[[topics]]
name = "temp/sensor-1"
partition = "temperature"
transform = "json"

[[topics]]
name = "humid/sensor-1"
partition = "humidity"
transform = "field_map"
fields = [{{ source = "relHumidity", target = "value", kind = "double" }}]
"#,
        data_dir.display()
    );
    TidepoolConfig::parse(&text).unwrap()
}

const INPUT: &str = "temp/sensor-1\t{\"value\": 21.5}\n\
temp/sensor-1\t{\"value\": 22.0}\n\
humid/sensor-1\t{\"relHumidity\": \"48\"}\n\
not a message\n\
news/today\t{\"headline\": \"unpersisted\"}\n";

#[tokio::test]
async fn test_run_rejects_blank_schema_name() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = config_for(temp_dir.path());
    config.schema.name = String::new();

    let result = commands::run(
        config.emitter_config(),
        INPUT.as_bytes(),
        std::future::pending(),
    )
    .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("schema name"));
    assert!(commands::partition_stats(temp_dir.path(), None)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_run_persists_input_lines() {
    let temp_dir = TempDir::new().unwrap();
    let config = config_for(temp_dir.path());

    let status = commands::run(
        config.emitter_config(),
        INPUT.as_bytes(),
        std::future::pending(),
    )
    .await
    .unwrap();

    assert_eq!(status.state, PersistenceState::Closed);
    assert_eq!(status.messages_persisted, 3);
    assert_eq!(status.messages_dropped, 0);

    let stats = commands::partition_stats(temp_dir.path(), Some("readings")).unwrap();
    let counts: Vec<_> = stats
        .iter()
        .map(|s| (s.partition.as_str(), s.records))
        .collect();
    assert_eq!(counts.len(), 2);
    assert!(counts.contains(&("temperature", Some(2))));
    assert!(counts.contains(&("humidity", Some(1))));

    let mut out = Vec::new();
    let written = commands::dump(
        temp_dir.path(),
        &PartitionId::new("humidity").unwrap(),
        "readings",
        &mut out,
    )
    .unwrap();
    assert_eq!(written, 1);
    assert_eq!(String::from_utf8(out).unwrap().trim(), r#"{"value":48.0}"#);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let temp_dir = TempDir::new().unwrap();
    let config = config_for(temp_dir.path());

    // Input that never ends
    let (_writer, reader) = tokio::io::duplex(64);
    let status = commands::run(
        config.emitter_config(),
        tokio::io::BufReader::new(reader),
        tokio::time::sleep(Duration::from_millis(50)),
    )
    .await
    .unwrap();

    assert_eq!(status.state, PersistenceState::Closed);
    assert_eq!(status.messages_buffered, 0);
}

#[tokio::test]
async fn test_offline_compaction() {
    let temp_dir = TempDir::new().unwrap();
    let config = config_for(temp_dir.path());
    commands::run(config.emitter_config(), INPUT.as_bytes(), std::future::pending())
        .await
        .unwrap();

    let all = commands::compact(temp_dir.path(), None).unwrap();
    assert_eq!(all.len(), 2);

    let temperature = PartitionId::new("temperature").unwrap();
    let one = commands::compact(temp_dir.path(), Some(&temperature)).unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].partition, temperature);

    let missing = PartitionId::new("pressure").unwrap();
    assert!(commands::compact(temp_dir.path(), Some(&missing)).is_err());

    // Records survive compaction
    let mut out = Vec::new();
    assert_eq!(
        commands::dump(temp_dir.path(), &temperature, "readings", &mut out).unwrap(),
        2
    );
}

#[test]
fn test_stats_on_empty_directory() {
    let temp_dir = TempDir::new().unwrap();
    assert!(commands::partition_stats(temp_dir.path(), None)
        .unwrap()
        .is_empty());
}

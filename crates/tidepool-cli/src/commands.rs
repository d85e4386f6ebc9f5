//! Subcommand implementations

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Serialize;
use tidepool_core::{LocalBus, Message};
use tidepool_emitter::{DurableEmitter, EmitterConfig, EmitterStatus};
use tidepool_storage::{
    compact_partition_file, discover_partitions, PartitionId, PartitionStore, RedbPartitionStore,
    Schema,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

/// Cache size for stores opened by offline commands
const OFFLINE_CACHE_SIZE: usize = 4 * 1024 * 1024;

/// Split a `topic<TAB>payload` input line
pub fn parse_line(line: &str) -> Option<Message> {
    let (topic, payload) = line.split_once('\t')?;
    let topic = topic.trim();
    if topic.is_empty() {
        return None;
    }
    Some(Message::new(topic, payload.to_string()))
}

/// Emit every input line through a redb-backed emitter until the input
/// ends or `shutdown` resolves, then close it and return its final status
pub async fn run<R, F>(
    config: EmitterConfig,
    input: R,
    shutdown: F,
) -> anyhow::Result<EmitterStatus>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    let emitter = DurableEmitter::with_local_storage(LocalBus::new(), config)?;
    let state = emitter.wait_ready().await;
    info!(%state, "Emitter started");

    let mut lines = input.lines();
    tokio::pin!(shutdown);
    let mut emitted = 0u64;

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let Some(message) = parse_line(&line) else {
                        if !line.trim().is_empty() {
                            warn!(line = %line, "Ignoring line without topic<TAB>payload");
                        }
                        continue;
                    };
                    match emitter.emit(message).await {
                        Ok(()) => emitted += 1,
                        Err(e) => warn!(error = %e, "Emit failed"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read input");
                    break;
                }
            },
            () = &mut shutdown => {
                info!("Interrupted");
                break;
            }
        }
    }

    info!(emitted, "Input finished, closing");
    emitter.close().await?;
    Ok(emitter.status())
}

/// Size and record count of one partition file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionStats {
    pub user_id: String,
    pub partition: PartitionId,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Records in the schema's table, when a schema was given
    pub records: Option<u64>,
}

/// Stats for every partition file under `data_dir`
///
/// Counting opens each file, which creates the schema's table if it is
/// missing.
pub fn partition_stats(
    data_dir: &Path,
    schema: Option<&str>,
) -> anyhow::Result<Vec<PartitionStats>> {
    let mut stats = Vec::new();

    for (user_id, partition, path) in discover_partitions(data_dir)? {
        let size_bytes = std::fs::metadata(&path)?.len();
        let records = match schema {
            Some(name) => {
                let store = RedbPartitionStore::open(
                    path.clone(),
                    partition.clone(),
                    Schema::named(name),
                    OFFLINE_CACHE_SIZE,
                )?;
                let count = store.count()?;
                store.close()?;
                Some(count)
            }
            None => None,
        };

        stats.push(PartitionStats {
            user_id,
            partition,
            path,
            size_bytes,
            records,
        });
    }

    Ok(stats)
}

/// Result of compacting one partition file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompactedFile {
    pub partition: PartitionId,
    pub path: PathBuf,
    pub size_before: u64,
    pub size_after: u64,
}

/// Compact partition files under `data_dir`, optionally only one partition
pub fn compact(data_dir: &Path, only: Option<&PartitionId>) -> anyhow::Result<Vec<CompactedFile>> {
    let mut compacted = Vec::new();

    for (_, partition, path) in discover_partitions(data_dir)? {
        if only.is_some_and(|p| p != &partition) {
            continue;
        }
        let size_before = std::fs::metadata(&path)?.len();
        compact_partition_file(&path)
            .with_context(|| format!("failed to compact {}", path.display()))?;
        let size_after = std::fs::metadata(&path)?.len();

        compacted.push(CompactedFile {
            partition,
            path,
            size_before,
            size_after,
        });
    }

    if let Some(partition) = only {
        if compacted.is_empty() {
            bail!("partition {partition} not found under {}", data_dir.display());
        }
    }
    Ok(compacted)
}

/// Write the records of a partition to `out` as JSON lines
///
/// Returns the number of records written.
pub fn dump<W: Write>(
    data_dir: &Path,
    partition: &PartitionId,
    schema: &str,
    out: &mut W,
) -> anyhow::Result<usize> {
    let files: Vec<_> = discover_partitions(data_dir)?
        .into_iter()
        .filter(|(_, p, _)| p == partition)
        .collect();
    if files.is_empty() {
        bail!("partition {partition} not found under {}", data_dir.display());
    }

    let mut written = 0;
    for (_, partition, path) in files {
        let store =
            RedbPartitionStore::open(path, partition, Schema::named(schema), OFFLINE_CACHE_SIZE)?;
        for stored in store.read_all()? {
            writeln!(out, "{}", serde_json::to_string(&stored.record)?)?;
            written += 1;
        }
        store.close()?;
    }

    Ok(written)
}

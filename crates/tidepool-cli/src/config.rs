//! Command line arguments and the `run` configuration file

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tidepool_emitter::{
    EmitterConfig, EmitterSettings, FieldMapTransform, JsonTransform, TopicConfig,
};
use tidepool_logging::LogConfig;
use tidepool_storage::{PartitionId, Schema};

#[derive(Parser)]
#[command(name = "tidepool", about = "Durable persistence for pub/sub traffic")]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Persist `topic<TAB>payload` lines read from stdin
    Run {
        /// TOML configuration file
        #[arg(long)]
        config: PathBuf,
    },
    /// Show size and record count of every partition file
    Stats {
        /// Directory holding the partition files
        #[arg(long)]
        data_dir: PathBuf,
        /// Schema whose records are counted
        #[arg(long)]
        schema: Option<String>,
    },
    /// Compact partition files offline
    Compact {
        #[arg(long)]
        data_dir: PathBuf,
        /// Only compact this partition
        #[arg(long)]
        partition: Option<PartitionId>,
    },
    /// Print the records of a partition as JSON lines
    Dump {
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long)]
        partition: PartitionId,
        /// Schema (table) the records were written under
        #[arg(long)]
        schema: String,
    },
}

/// Built-in payload transforms selectable from TOML
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "transform", rename_all = "snake_case")]
pub enum TransformSpec {
    Json,
    FieldMap(FieldMapTransform),
}

/// One `[[topics]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicEntry {
    pub name: String,
    pub partition: PartitionId,
    #[serde(flatten)]
    pub transform: TransformSpec,
}

impl TopicEntry {
    fn topic_config(&self) -> TopicConfig {
        match &self.transform {
            TransformSpec::Json => {
                TopicConfig::new(self.name.clone(), self.partition.clone(), JsonTransform)
            }
            TransformSpec::FieldMap(transform) => TopicConfig::new(
                self.name.clone(),
                self.partition.clone(),
                transform.clone(),
            ),
        }
    }
}

/// Contents of the file passed to `tidepool run`
///
/// ```toml
/// [settings]
/// data_dir = "./tidepool-data"
/// sync_interval_ms = 5000
///
/// [schema]
/// name = "events"
///
/// [[topics]]
/// name = "temp/sensor-1"
/// partition = "temperature"
/// transform = "json"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct TidepoolConfig {
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub settings: EmitterSettings,
    pub schema: Schema,
    #[serde(default)]
    pub topics: Vec<TopicEntry>,
}

impl TidepoolConfig {
    /// Read and parse a configuration file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid configuration in {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Emitter configuration described by this file
    pub fn emitter_config(&self) -> EmitterConfig {
        self.topics.iter().fold(
            EmitterConfig::new(self.schema.clone()).with_settings(self.settings.clone()),
            |config, topic| config.with_topic(topic.topic_config()),
        )
    }
}

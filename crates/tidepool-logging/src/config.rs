//! Logging settings
//!
//! These types deserialize from the `[logging]` table of a Tidepool
//! configuration file. Every field has a default, so a partial table is
//! enough.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where and how Tidepool writes its logs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive applied when `RUST_LOG` is unset
    pub default_level: String,
    pub console: ConsoleConfig,
    /// Rolling file sink, off unless configured
    pub file: Option<FileConfig>,
    /// Shape of JSON lines, shared by console and file sinks
    pub jsonl: JsonlConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::with_console_level("info", ConsoleConfig::default())
    }
}

impl LogConfig {
    fn with_console_level(level: &str, console: ConsoleConfig) -> Self {
        Self {
            default_level: level.to_string(),
            console,
            file: None,
            jsonl: JsonlConfig::default(),
        }
    }

    /// Colored, human-readable output at `debug`
    pub fn development() -> Self {
        Self::with_console_level(
            "debug",
            ConsoleConfig {
                pretty: true,
                ansi: true,
                ..ConsoleConfig::default()
            },
        )
    }

    /// JSON lines into `log_dir` only; the console stays quiet
    pub fn production(log_dir: PathBuf) -> Self {
        let mut config = Self::with_console_level(
            "info",
            ConsoleConfig {
                enabled: false,
                ..ConsoleConfig::default()
            },
        );
        config.file = Some(FileConfig {
            directory: log_dir,
            ..FileConfig::default()
        });
        config
    }

    /// Warnings and errors only
    pub fn testing() -> Self {
        Self::with_console_level("warn", ConsoleConfig::default())
    }
}

/// Terminal sink
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    /// Human-readable lines instead of JSON
    pub pretty: bool,
    pub ansi: bool,
    /// Log to stderr so stdout carries only command output
    pub stderr: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pretty: false,
            ansi: false,
            stderr: false,
        }
    }
}

/// Rolling file sink
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub directory: PathBuf,
    /// Log file names start with this
    pub prefix: String,
    pub rotation: RotationStrategy,
    /// Older rotated files beyond this count are pruned
    pub max_files: Option<usize>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            prefix: "tidepool".to_string(),
            rotation: RotationStrategy::Daily,
            max_files: Some(7),
        }
    }
}

/// When the file sink starts a new file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationStrategy {
    #[default]
    Daily,
    Hourly,
    /// One file, truncated at startup
    Never,
}

/// Fields carried on each JSON line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonlConfig {
    /// Put event fields at the top level rather than under `fields`
    pub flatten_events: bool,
    pub include_spans: bool,
    pub include_thread_info: bool,
    /// Source file and line of the event
    pub include_location: bool,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            flatten_events: true,
            include_spans: true,
            include_thread_info: false,
            include_location: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_log_json_at_info() {
        let config = LogConfig::default();
        assert_eq!(config.default_level, "info");
        assert!(config.console.enabled);
        assert!(!config.console.pretty);
        assert!(!config.console.stderr);
        assert!(config.file.is_none());
        assert!(config.jsonl.flatten_events);
    }

    #[test]
    fn test_presets() {
        let dev = LogConfig::development();
        assert_eq!(dev.default_level, "debug");
        assert!(dev.console.pretty && dev.console.ansi);

        let quiet = LogConfig::testing();
        assert_eq!(quiet.default_level, "warn");
        assert!(quiet.console.enabled);

        let prod = LogConfig::production(PathBuf::from("/var/log/tidepool"));
        assert!(!prod.console.enabled);
        let file = prod.file.unwrap();
        assert_eq!(file.directory, PathBuf::from("/var/log/tidepool"));
        assert_eq!(file.prefix, "tidepool");
        assert_eq!(file.rotation, RotationStrategy::Daily);
    }

    #[test]
    fn test_partial_table_fills_defaults() {
        let config: LogConfig = toml::from_str(
            r#"
default_level = "trace"

[console]
stderr = true

[file]
directory = "/tmp/tidepool-logs"
rotation = "never"
"#,
        )
        .unwrap();

        assert_eq!(config.default_level, "trace");
        assert!(config.console.enabled);
        assert!(config.console.stderr);
        let file = config.file.unwrap();
        assert_eq!(file.rotation, RotationStrategy::Never);
        assert_eq!(file.max_files, Some(7));
        assert!(config.jsonl.include_location);
    }
}

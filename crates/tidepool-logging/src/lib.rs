//! Tracing subscriber setup for Tidepool binaries
//!
//! Console output is JSON lines unless `pretty` is set. An optional rolling
//! file sink always writes JSON lines. `RUST_LOG`, when present, replaces
//! the configured level.
//!
//! ```ignore
//! use tidepool_logging::{LogConfig, TidepoolSubscriberBuilder};
//!
//! let _guard = TidepoolSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .with_stderr(true)
//!     .init();
//! ```

pub mod config;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use tracing_appender::non_blocking::WorkerGuard;

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::layers::BoxedLayer;

#[derive(Debug, Error)]
pub enum LogInitError {
    #[error("cannot open log output: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot build log file appender: {0}")]
    Appender(String),

    #[error("a global subscriber is already installed: {0}")]
    AlreadySet(String),
}

/// Installs the global `tracing` subscriber from a [`LogConfig`]
#[derive(Debug, Default)]
pub struct TidepoolSubscriberBuilder {
    config: LogConfig,
}

impl TidepoolSubscriberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the level used when `RUST_LOG` is unset
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Keep stdout free for command output
    pub fn with_stderr(mut self, enabled: bool) -> Self {
        self.config.console.stderr = enabled;
        self
    }

    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Install the subscriber, reporting failure on stderr
    ///
    /// Hold the returned guard until exit when a file sink is configured;
    /// dropping it flushes and stops the background writer.
    pub fn init(self) -> Option<WorkerGuard> {
        self.try_init().unwrap_or_else(|e| {
            eprintln!("tidepool: logging disabled: {e}");
            None
        })
    }

    /// Install the subscriber
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LogInitError> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.default_level));

        let LogConfig {
            console,
            file,
            jsonl,
            ..
        } = &self.config;

        let mut sinks: Vec<BoxedLayer<Registry>> = Vec::new();
        if console.enabled {
            sinks.push(match (console.pretty, console.stderr) {
                (true, true) => layers::pretty_layer(std::io::stderr, console.ansi),
                (true, false) => layers::pretty_layer(std::io::stdout, console.ansi),
                (false, true) => layers::jsonl_layer(std::io::stderr, jsonl),
                (false, false) => layers::jsonl_layer(std::io::stdout, jsonl),
            });
        }

        let guard = match file {
            Some(file) => {
                let (writer, guard) = layers::file_writer(file)?;
                sinks.push(layers::jsonl_layer(writer, jsonl));
                Some(guard)
            }
            None => None,
        };

        tracing_subscriber::registry()
            .with(sinks)
            .with(filter)
            .try_init()
            .map_err(|e| LogInitError::AlreadySet(e.to_string()))?;

        Ok(guard)
    }
}

/// Safe to call from many tests; only the first call installs
pub fn init_testing() {
    let _ = TidepoolSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

//! Layer and writer construction
//!
//! Console and file output are assembled as boxed layers so any
//! combination of them can be stacked on one registry.

use std::fs::{self, File};

use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::config::{FileConfig, JsonlConfig, RotationStrategy};
use crate::LogInitError;

/// A type-erased layer
pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Create a JSONL formatting layer writing to `writer`
pub fn jsonl_layer<S, W>(writer: W, config: &JsonlConfig) -> BoxedLayer<S>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(config.include_spans)
        .flatten_event(config.flatten_events)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_thread_ids(config.include_thread_info)
        .with_thread_names(config.include_thread_info)
        .with_writer(writer)
        .boxed()
}

/// Create a human-readable layer writing to `writer`
pub fn pretty_layer<S, W>(writer: W, ansi: bool) -> BoxedLayer<S>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_ansi(ansi)
        .with_target(true)
        .with_writer(writer)
        .boxed()
}

/// Open the non-blocking file writer described by `config`
///
/// `Never` truncates a single `<prefix>.log`; the rotating strategies
/// append to dated files and prune beyond `max_files`.
pub fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LogInitError> {
    fs::create_dir_all(&config.directory)?;

    let rotation = match config.rotation {
        RotationStrategy::Never => {
            let file = File::create(config.directory.join(format!("{}.log", config.prefix)))?;
            return Ok(tracing_appender::non_blocking(file));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(config.prefix.clone())
        .filename_suffix("log");
    if let Some(max_files) = config.max_files {
        builder = builder.max_log_files(max_files);
    }
    let appender = builder
        .build(&config.directory)
        .map_err(|e| LogInitError::Appender(e.to_string()))?;

    Ok(tracing_appender::non_blocking(appender))
}

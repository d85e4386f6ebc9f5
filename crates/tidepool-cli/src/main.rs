use clap::Parser;
use tidepool_cli::commands;
use tidepool_cli::config::{Cli, Command, TidepoolConfig};
use tidepool_logging::{LogConfig, TidepoolSubscriberBuilder, WorkerGuard};
use tokio::io::BufReader;

/// Logging for the offline commands: pretty, on stderr, quiet by default
fn offline_logging(level: Option<String>) -> Option<WorkerGuard> {
    TidepoolSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .with_level(level.unwrap_or_else(|| "warn".to_string()))
        .with_stderr(true)
        .init()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => {
            let file = TidepoolConfig::load(&config)?;

            let mut logging = file.logging.clone();
            if let Some(level) = cli.log_level {
                logging.default_level = level;
            }
            let _guard = TidepoolSubscriberBuilder::new()
                .with_config(logging)
                .with_stderr(true)
                .init();

            let stdin = BufReader::new(tokio::io::stdin());
            let status = commands::run(file.emitter_config(), stdin, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            })
            .await?;

            println!("{}", serde_json::to_string_pretty(&status)?);
        }

        Command::Stats { data_dir, schema } => {
            let _guard = offline_logging(cli.log_level);
            let stats = commands::partition_stats(&data_dir, schema.as_deref())?;
            if stats.is_empty() {
                println!("No partitions under {}", data_dir.display());
            }
            for s in stats {
                match s.records {
                    Some(records) => println!(
                        "{}/{}  {} bytes  {} records",
                        s.user_id, s.partition, s.size_bytes, records
                    ),
                    None => println!("{}/{}  {} bytes", s.user_id, s.partition, s.size_bytes),
                }
            }
        }

        Command::Compact {
            data_dir,
            partition,
        } => {
            let _guard = offline_logging(cli.log_level);
            for c in commands::compact(&data_dir, partition.as_ref())? {
                println!(
                    "{}: {} -> {} bytes",
                    c.path.display(),
                    c.size_before,
                    c.size_after
                );
            }
        }

        Command::Dump {
            data_dir,
            partition,
            schema,
        } => {
            let _guard = offline_logging(cli.log_level);
            let mut stdout = std::io::stdout().lock();
            commands::dump(&data_dir, &partition, &schema, &mut stdout)?;
        }
    }

    Ok(())
}

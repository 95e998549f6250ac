//! tally command line
//!
//! Watches a CSV or Parquet file and appends a report line to the output file
//! at every aggregation boundary until interrupted.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tally::engine::{open_report_sink, StreamEngine};
use tally::formatters::OutputFormat;
use tally::logging::setup::{init_logging, LoggingConfig};
use tally::prelude::*;
use tally::sources::{open_source, ColumnMapping};
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// File to watch (.csv, .tsv, .txt, .parquet or .pq)
    path: String,

    /// Seconds between checks of the file for new rows
    #[arg(long, default_value_t = 10)]
    poll_interval: u64,

    /// Aggregate every hour at this minute
    #[arg(long, conflicts_with = "every")]
    minute: Option<u32>,

    /// Aggregate at every multiple of this many seconds instead of hourly
    #[arg(long)]
    every: Option<u64>,

    /// Report file, appended to
    #[arg(long, short, default_value = "hourly_update.txt")]
    output: PathBuf,

    /// Report format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Whether rows already in the file are aggregated
    #[arg(long, value_enum, default_value_t = Start::Beginning)]
    start: Start,

    /// Name of the timestamp column
    #[arg(long, default_value = "timestamp")]
    timestamp_column: String,

    /// Name of the value column
    #[arg(long, default_value = "value")]
    value_column: String,

    /// Log level for tally
    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Start {
    Beginning,
    End,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        let cadence = match (self.every, self.minute) {
            (Some(secs), _) => Cadence::Every(Duration::from_secs(secs)),
            (None, minute) => Cadence::Hourly {
                minute: minute.unwrap_or(0),
            },
        };
        let format = match self.format {
            Format::Text => OutputFormat::Text,
            Format::Json => OutputFormat::Json,
        };
        let start = match self.start {
            Start::Beginning => StartPosition::Beginning,
            Start::End => StartPosition::End,
        };

        EngineConfig::new()
            .with_poll_interval(Duration::from_secs(self.poll_interval))
            .with_cadence(cadence)
            .with_output_format(format)
            .with_output_path(&self.output)
            .with_start_position(start)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let logging = LoggingConfig::default()
        .with_tally_level(args.log_level)
        .with_json_format(args.json_logs);
    init_logging(logging).map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    let config = args.engine_config();
    config.validate().context("Invalid configuration")?;

    let columns = ColumnMapping::new(&args.timestamp_column, &args.value_column);
    let source = open_source(&args.path, columns)
        .with_context(|| format!("Failed to open {}", args.path))?;
    let sink = open_report_sink(&config)
        .await
        .with_context(|| format!("Failed to open {}", config.output_path().display()))?;

    info!(
        source = %source.description(),
        output = %config.output_path().display(),
        "Watching for new data, press Ctrl-C to stop"
    );
    let engine = StreamEngine::start(config, source, Box::new(sink))?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    let stats = engine.shutdown().await?;
    info!(
        polls = stats.poller.polls,
        records_read = stats.poller.records_read,
        source_errors = stats.poller.source_errors,
        periods = stats.aggregator.periods,
        empty_periods = stats.aggregator.empty_periods,
        sink_errors = stats.aggregator.sink_errors,
        discarded = stats.discarded,
        total_count = stats.final_state.total_count,
        "Shutdown complete"
    );
    Ok(())
}

//! Wiring of the poller and aggregation worker into a running engine.
//!
//! ```text
//! ┌──────────────┐  read_since   ┌──────────┐  append   ┌──────────────┐
//! │  DataSource  │──────────────▶│  Poller  │──────────▶│ RecordBuffer │
//! └──────────────┘               └──────────┘           └──────┬───────┘
//!                                                              │ drain_all
//!                    ┌──────────────────┐   tick   ┌───────────▼───────────┐
//!                    │ PeriodicTrigger  │─────────▶│   AggregationWorker   │
//!                    └──────────────────┘          └───────────┬───────────┘
//!                                                              │ write
//!                                                      ┌───────▼──────┐
//!                                                      │  ResultSink  │
//!                                                      └──────────────┘
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::aggregator::{AggregationWorker, AggregatorStats, CumulativeState};
use crate::buffer::RecordBuffer;
use crate::config::EngineConfig;
use crate::formatters::{JsonFormatter, OutputFormat, ReportFormatter, TextFormatter};
use crate::poller::{Poller, PollerStats};
use crate::prelude::*;
use crate::sink::{FileSink, ResultSink};
use crate::sources::DataSource;
use crate::trigger::PeriodicTrigger;

/// Final statistics of a stopped engine.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub poller: PollerStats,
    pub aggregator: AggregatorStats,
    /// Records still buffered at shutdown and never aggregated.
    pub discarded: usize,
    pub final_state: CumulativeState,
}

/// A running ingestion and aggregation pipeline.
///
/// The poller and the aggregation worker run as two independent tasks that
/// share only the [`RecordBuffer`]. Both stop when [`shutdown`](Self::shutdown)
/// is called.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tally::config::EngineConfig;
/// use tally::engine::{open_report_sink, StreamEngine};
/// use tally::sources::{CsvSource, DataSource};
///
/// # async fn example() -> tally::error::Result<()> {
/// let config = EngineConfig::new();
/// let source: Arc<dyn DataSource> = Arc::new(CsvSource::new("time_series.csv")?);
/// let sink = open_report_sink(&config).await?;
///
/// let engine = StreamEngine::start(config, source, Box::new(sink))?;
/// tokio::signal::ctrl_c().await?;
/// let stats = engine.shutdown().await?;
/// println!("{} periods reported", stats.aggregator.periods);
/// # Ok(())
/// # }
/// ```
pub struct StreamEngine {
    config: EngineConfig,
    buffer: RecordBuffer,
    shutdown_tx: watch::Sender<bool>,
    poller_handle: JoinHandle<PollerStats>,
    worker_handle: JoinHandle<AggregatorStats>,
}

impl StreamEngine {
    /// Validates `config` and spawns the poller and aggregation worker.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::Configuration`] if the configuration is invalid.
    #[instrument(
        skip(config, source, sink),
        fields(source = %source.description(), sink = %sink.description())
    )]
    pub fn start(
        config: EngineConfig,
        source: Arc<dyn DataSource>,
        sink: Box<dyn ResultSink>,
    ) -> Result<Self> {
        config.validate()?;

        let buffer = RecordBuffer::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poller = Poller::new(
            source,
            buffer.clone(),
            config.poll_interval(),
            shutdown_rx.clone(),
        )
        .with_start_position(config.start_position());
        let trigger = PeriodicTrigger::new(config.cadence(), config.check_interval());
        let worker = AggregationWorker::new(buffer.clone(), trigger, sink, shutdown_rx);

        let poller_handle = tokio::spawn(async move { poller.run().await });
        let worker_handle = tokio::spawn(async move { worker.run().await });

        info!(cadence = %config.cadence().label(), "Stream engine started");

        Ok(Self {
            config,
            buffer,
            shutdown_tx,
            poller_handle,
            worker_handle,
        })
    }

    /// The configuration the engine runs with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The buffer shared by the poller and the aggregation worker.
    pub fn buffer(&self) -> &RecordBuffer {
        &self.buffer
    }

    /// Stops both tasks and returns their statistics.
    ///
    /// A poll or aggregation already in progress completes first. Records
    /// buffered after the last boundary are discarded and counted.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::Internal`] if either task panicked.
    #[instrument(skip(self))]
    pub async fn shutdown(self) -> Result<EngineStats> {
        info!("Initiating graceful shutdown");
        self.shutdown_tx.send_replace(true);

        let (poller, worker) = tokio::join!(self.poller_handle, self.worker_handle);
        let poller = poller.map_err(|e| TallyError::Internal(format!("Poller task failed: {e}")))?;
        let aggregator = worker
            .map_err(|e| TallyError::Internal(format!("Aggregation task failed: {e}")))?;

        let remaining = self.buffer.drain_all().await;
        if !remaining.is_empty() {
            warn!(
                count = remaining.len(),
                "Discarding records buffered after the last boundary"
            );
        }

        info!(
            periods = aggregator.periods,
            records_read = poller.records_read,
            "Stream engine stopped"
        );

        Ok(EngineStats {
            final_state: aggregator.final_state,
            discarded: remaining.len(),
            poller,
            aggregator,
        })
    }
}

/// Builds the formatter described by `config`.
pub fn report_formatter(config: &EngineConfig) -> Box<dyn ReportFormatter> {
    match config.output_format() {
        OutputFormat::Text => Box::new(
            TextFormatter::new(config.cadence().label())
                .with_timestamp_format(config.timestamp_format()),
        ),
        OutputFormat::Json => Box::new(JsonFormatter::new()),
    }
}

/// Opens the report file named by `config` for appending.
pub async fn open_report_sink(config: &EngineConfig) -> Result<FileSink> {
    FileSink::open(config.output_path(), report_formatter(config)).await
}

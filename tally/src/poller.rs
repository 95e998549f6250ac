//! Periodic ingestion of new records from a data source.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::buffer::RecordBuffer;
use crate::config::StartPosition;
use crate::sources::{DataSource, Marker};

/// Statistics from the poller.
#[derive(Debug, Clone, Default)]
pub struct PollerStats {
    pub polls: u64,
    pub unchanged_polls: u64,
    pub records_read: u64,
    pub source_errors: u64,
}

/// Background worker that moves new source records into the buffer.
///
/// The poller owns its [`Marker`]. The marker only advances after the records
/// read with it were appended to the buffer, so a failed read is retried in
/// full on the next poll and no record is read twice.
pub struct Poller {
    source: Arc<dyn DataSource>,
    buffer: RecordBuffer,
    shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
    start_position: StartPosition,
    marker: Marker,
    stats: PollerStats,
}

impl Poller {
    /// Create a new poller reading from the beginning of `source`.
    pub fn new(
        source: Arc<dyn DataSource>,
        buffer: RecordBuffer,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            buffer,
            shutdown,
            poll_interval,
            start_position: StartPosition::Beginning,
            marker: Marker::START,
            stats: PollerStats::default(),
        }
    }

    /// Set where reading starts.
    pub fn with_start_position(mut self, position: StartPosition) -> Self {
        self.start_position = position;
        self
    }

    /// The marker of the last successful read.
    pub fn marker(&self) -> Marker {
        self.marker
    }

    /// Statistics collected so far.
    pub fn stats(&self) -> &PollerStats {
        &self.stats
    }

    /// Run the poller until shutdown.
    ///
    /// The first poll happens immediately. A poll in progress when shutdown is
    /// signalled is completed. Returns the accumulated statistics.
    #[instrument(skip(self), fields(source = %self.source.description()))]
    pub async fn run(mut self) -> PollerStats {
        info!(
            interval_ms = self.poll_interval.as_millis() as u64,
            start = ?self.start_position,
            "Poller started"
        );
        let mut interval = interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut positioned = self.start_position == StartPosition::Beginning;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {
                    if positioned {
                        self.poll_once().await;
                    } else {
                        positioned = self.skip_existing().await;
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(
            "Poller stopped: {} polls, {} unchanged, {} records, {} source errors",
            self.stats.polls,
            self.stats.unchanged_polls,
            self.stats.records_read,
            self.stats.source_errors
        );
        self.stats
    }

    /// Move the marker to the current end of the source.
    ///
    /// Returns false if the source could not be read; the caller retries on
    /// the next tick.
    async fn skip_existing(&mut self) -> bool {
        match self.source.end_marker().await {
            Ok(marker) => {
                info!(rows = marker.rows(), "Skipping rows present at start-up");
                self.marker = marker;
                true
            }
            Err(e) => {
                warn!("Could not position at end of source: {}", e);
                self.stats.source_errors += 1;
                false
            }
        }
    }

    /// Check the source once and buffer anything new.
    ///
    /// Source errors are logged and counted, never propagated; the marker is
    /// left where it was. Returns the number of records appended.
    pub async fn poll_once(&mut self) -> usize {
        self.stats.polls += 1;

        match self.source.changed(&self.marker).await {
            Ok(true) => {}
            Ok(false) => {
                self.stats.unchanged_polls += 1;
                return 0;
            }
            Err(e) => {
                warn!("Failed to check source for changes: {}", e);
                self.stats.source_errors += 1;
                return 0;
            }
        }

        match self.source.read_since(&self.marker).await {
            Ok((records, marker)) => {
                let count = records.len();
                self.buffer.append(records).await;
                self.marker = marker;
                self.stats.records_read += count as u64;
                debug!(
                    records = count,
                    rows = marker.rows(),
                    "Buffered new records"
                );
                count
            }
            Err(e) => {
                warn!(transient = e.is_transient(), "Failed to read source: {}", e);
                self.stats.source_errors += 1;
                0
            }
        }
    }
}

//! Period and cumulative averaging.
//!
//! [`Aggregator`] turns one drained batch of records into a [`PeriodResult`]
//! and carries the running [`CumulativeState`] from period to period. The
//! [`AggregationWorker`] drives it from a [`PeriodicTrigger`] on its own task
//! and forwards every result to a [`ResultSink`].

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::buffer::RecordBuffer;
use crate::sink::ResultSink;
use crate::sources::Record;
use crate::trigger::PeriodicTrigger;

/// Running totals over every numeric value aggregated since start-up.
///
/// Only the aggregation task touches this state, so it carries no lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CumulativeState {
    /// Sum of all values.
    pub total_sum: f64,
    /// Count of numeric values.
    pub total_count: u64,
}

impl CumulativeState {
    /// Calculates the running mean, or `None` before any value was seen.
    pub fn mean(&self) -> Option<f64> {
        if self.total_count == 0 {
            None
        } else {
            Some(self.total_sum / self.total_count as f64)
        }
    }
}

/// Outcome of one aggregation period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodResult {
    /// The boundary that closed the period.
    pub period_end: DateTime<Local>,
    /// Mean of this period's numeric values; `None` when there were none.
    pub period_average: Option<f64>,
    /// Mean of every numeric value seen so far.
    pub cumulative_average: Option<f64>,
    /// Whether the period contained at least one numeric value.
    pub had_data: bool,
}

/// Computes period averages and maintains the cumulative state.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    state: CumulativeState,
}

impl Aggregator {
    /// Creates an aggregator with empty cumulative state.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cumulative state after the periods aggregated so far.
    pub fn state(&self) -> CumulativeState {
        self.state
    }

    /// Aggregates one period's records.
    ///
    /// Absent values are skipped. A period without any numeric value leaves
    /// the cumulative state untouched and reports the previous cumulative
    /// average.
    pub fn aggregate(&mut self, records: &[Record], period_end: DateTime<Local>) -> PeriodResult {
        let (curr_sum, curr_count) = records
            .iter()
            .filter_map(Record::numeric)
            .fold((0.0_f64, 0_u64), |(sum, count), v| (sum + v, count + 1));

        let skipped = records.len() as u64 - curr_count;
        if skipped > 0 {
            debug!(skipped, "Ignored records without a numeric value");
        }

        if curr_count == 0 {
            return PeriodResult {
                period_end,
                period_average: None,
                cumulative_average: self.state.mean(),
                had_data: false,
            };
        }

        self.state.total_sum += curr_sum;
        self.state.total_count += curr_count;

        PeriodResult {
            period_end,
            period_average: Some(curr_sum / curr_count as f64),
            cumulative_average: self.state.mean(),
            had_data: true,
        }
    }
}

/// Statistics from the aggregation worker.
#[derive(Debug, Clone, Default)]
pub struct AggregatorStats {
    pub periods: u64,
    pub empty_periods: u64,
    pub values_aggregated: u64,
    pub values_skipped: u64,
    pub sink_errors: u64,
    pub final_state: CumulativeState,
}

/// Background worker that aggregates the buffer at every trigger boundary.
pub struct AggregationWorker {
    buffer: RecordBuffer,
    aggregator: Aggregator,
    trigger: PeriodicTrigger,
    sink: Box<dyn ResultSink>,
    shutdown: watch::Receiver<bool>,
    stats: AggregatorStats,
}

impl AggregationWorker {
    /// Create a new aggregation worker.
    pub fn new(
        buffer: RecordBuffer,
        trigger: PeriodicTrigger,
        sink: Box<dyn ResultSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            buffer,
            aggregator: Aggregator::new(),
            trigger,
            sink,
            shutdown,
            stats: AggregatorStats::default(),
        }
    }

    /// Run the worker until shutdown.
    ///
    /// A period that already started aggregating is completed before the
    /// shutdown signal is looked at again. Returns the accumulated statistics.
    #[instrument(skip(self), fields(sink = %self.sink.description()))]
    pub async fn run(mut self) -> AggregatorStats {
        info!(
            next_boundary = %self.trigger.next_boundary(),
            "Aggregation worker started"
        );

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                boundary = self.trigger.tick() => {
                    self.aggregate_period(boundary).await;
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.stats.final_state = self.aggregator.state();
        info!(
            "Aggregation worker stopped: {} periods, {} empty, {} values, {} sink errors",
            self.stats.periods,
            self.stats.empty_periods,
            self.stats.values_aggregated,
            self.stats.sink_errors
        );
        self.stats
    }

    /// Drain the buffer, aggregate it and report the result.
    async fn aggregate_period(&mut self, boundary: DateTime<Local>) {
        let records = self.buffer.drain_all().await;
        let before = self.aggregator.state().total_count;
        let result = self.aggregator.aggregate(&records, boundary);

        let numeric = self.aggregator.state().total_count - before;
        self.stats.periods += 1;
        self.stats.values_aggregated += numeric;
        self.stats.values_skipped += records.len() as u64 - numeric;

        if result.had_data {
            info!(
                period_end = %boundary,
                records = records.len(),
                period_average = ?result.period_average,
                cumulative_average = ?result.cumulative_average,
                "Aggregated period"
            );
        } else {
            self.stats.empty_periods += 1;
            warn!(period_end = %boundary, records = records.len(), "No numeric data in period");
        }

        if let Err(e) = self.sink.write(&result).await {
            error!("Failed to write period report: {}", e);
            self.stats.sink_errors += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TallyError;
    use crate::sink::MemorySink;
    use crate::trigger::Cadence;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn values(raw: &[&str]) -> Vec<Record> {
        raw.iter()
            .map(|v| Record::parse("2024-01-01 00:00:00", v))
            .collect()
    }

    #[test]
    fn test_period_with_non_numeric_value() {
        let mut aggregator = Aggregator::new();
        let result = aggregator.aggregate(&values(&["10", "20", "bad", "30"]), Local::now());

        assert!(result.had_data);
        assert_eq!(result.period_average, Some(20.0));
        assert_eq!(result.cumulative_average, Some(20.0));
        assert_eq!(
            aggregator.state(),
            CumulativeState {
                total_sum: 60.0,
                total_count: 3
            }
        );
    }

    #[test]
    fn test_empty_period_keeps_cumulative_state() {
        let mut aggregator = Aggregator::new();
        aggregator.aggregate(&values(&["10", "20", "bad", "30"]), Local::now());

        let result = aggregator.aggregate(&[], Local::now());
        assert!(!result.had_data);
        assert_eq!(result.period_average, None);
        assert_eq!(result.cumulative_average, Some(20.0));
        assert_eq!(aggregator.state().total_count, 3);
    }

    #[test]
    fn test_only_absent_values_is_an_empty_period() {
        let mut aggregator = Aggregator::new();
        let result = aggregator.aggregate(&values(&["bad", "", "NaN"]), Local::now());

        assert!(!result.had_data);
        assert_eq!(result.period_average, None);
        assert_eq!(result.cumulative_average, None);
        assert_eq!(aggregator.state(), CumulativeState::default());
    }

    #[test]
    fn test_cumulative_average_across_periods() {
        let mut aggregator = Aggregator::new();

        let first = aggregator.aggregate(&values(&["5", "5"]), Local::now());
        assert_eq!(first.period_average, Some(5.0));
        assert_eq!(first.cumulative_average, Some(5.0));

        let second = aggregator.aggregate(&values(&["15"]), Local::now());
        assert_eq!(second.period_average, Some(15.0));
        assert_eq!(second.cumulative_average, Some(25.0 / 3.0));
    }

    #[test]
    fn test_first_period_empty_has_no_cumulative_average() {
        let mut aggregator = Aggregator::new();
        let result = aggregator.aggregate(&[], Local::now());
        assert_eq!(result.cumulative_average, None);
        assert!(!result.had_data);
    }

    #[tokio::test]
    async fn test_worker_aggregates_buffer_at_boundary() {
        let buffer = RecordBuffer::new();
        let sink = MemorySink::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let trigger = PeriodicTrigger::new(
            Cadence::Every(Duration::from_millis(100)),
            Duration::from_millis(10),
        );

        buffer.append(values(&["10", "20", "bad", "30"])).await;
        let worker = AggregationWorker::new(
            buffer.clone(),
            trigger,
            Box::new(sink.clone()),
            shutdown_rx,
        );
        let handle = tokio::spawn(worker.run());

        let first = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(result) = sink.results().await.first().cloned() {
                    return result;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(true).unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(first.had_data);
        assert_eq!(first.period_average, Some(20.0));
        assert_eq!(stats.values_aggregated, 3);
        assert_eq!(stats.values_skipped, 1);
        assert_eq!(stats.final_state.total_count, 3);
        assert!(buffer.is_empty().await);
    }

    #[test]
    fn test_infinite_values_are_skipped() {
        let mut aggregator = Aggregator::new();
        let records = vec![
            Record::parse("2024-01-01 00:00:00", "inf"),
            Record::parse("2024-01-01 00:00:01", "-inf"),
            Record::parse("2024-01-01 00:00:02", "1e400"),
            Record {
                timestamp: None,
                value: Some(f64::INFINITY),
            },
            Record::parse("2024-01-01 00:00:03", "4"),
        ];

        let result = aggregator.aggregate(&records, Local::now());
        assert_eq!(result.period_average, Some(4.0));
        assert_eq!(result.cumulative_average, Some(4.0));
        assert_eq!(aggregator.state().total_count, 1);
    }

    /// Sink that rejects every write.
    #[derive(Clone, Default)]
    struct FailingSink {
        calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl ResultSink for FailingSink {
        async fn write(&mut self, _result: &PeriodResult) -> crate::error::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(TallyError::sink("failing", "disk full"))
        }

        fn description(&self) -> String {
            "failing".to_string()
        }
    }

    #[tokio::test]
    async fn test_worker_continues_after_sink_errors() {
        let buffer = RecordBuffer::new();
        let sink = FailingSink::default();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let trigger = PeriodicTrigger::new(
            Cadence::Every(Duration::from_millis(50)),
            Duration::from_millis(5),
        );

        buffer.append(values(&["10", "bad"])).await;
        let worker = AggregationWorker::new(
            buffer.clone(),
            trigger,
            Box::new(sink.clone()),
            shutdown_rx,
        );
        let handle = tokio::spawn(worker.run());

        tokio::time::timeout(Duration::from_secs(2), async {
            while sink.calls.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(true).unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(stats.sink_errors >= 2);
        assert_eq!(stats.periods, stats.sink_errors);
        assert_eq!(stats.periods, sink.calls.load(Ordering::SeqCst));
        assert_eq!(stats.values_aggregated, 1);
        assert_eq!(stats.values_skipped, 1);
        assert_eq!(stats.final_state.total_count, 1);
    }

    #[tokio::test]
    async fn test_worker_stops_without_reporting() {
        let sink = MemorySink::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let trigger = PeriodicTrigger::new(Cadence::default(), Duration::from_secs(1));

        let worker = AggregationWorker::new(
            RecordBuffer::new(),
            trigger,
            Box::new(sink.clone()),
            shutdown_rx,
        );
        let handle = tokio::spawn(worker.run());
        shutdown_tx.send(true).unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.periods, 0);
        assert!(sink.results().await.is_empty());
    }
}

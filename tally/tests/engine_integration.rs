//! End-to-end tests of the running engine.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tally::aggregator::PeriodResult;
use tally::engine::{open_report_sink, StreamEngine};
use tally::prelude::*;
use tally::sink::MemorySink;
use tally::sources::{CsvSource, MemorySource};
use tempfile::TempDir;

fn fast_config(period_ms: u64) -> EngineConfig {
    EngineConfig::new()
        .with_poll_interval(Duration::from_millis(20))
        .with_cadence(Cadence::Every(Duration::from_millis(period_ms)))
        .with_check_interval(Duration::from_millis(10))
}

fn record(value: &str) -> Record {
    Record::parse("2024-01-01 00:00:00", value)
}

/// Waits until `sink` holds a result matching `predicate` past index `from`.
async fn wait_for(
    sink: &MemorySink,
    from: usize,
    predicate: impl Fn(&PeriodResult) -> bool,
) -> (usize, PeriodResult) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let results = sink.results().await;
            if let Some((index, result)) = results
                .iter()
                .enumerate()
                .skip(from)
                .find(|&(_, r)| predicate(r))
            {
                return (index, result.clone());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for a period result")
}

#[tokio::test]
async fn test_period_and_cumulative_averages() {
    let source = MemorySource::new();
    let sink = MemorySink::new();
    let engine = StreamEngine::start(
        fast_config(200),
        Arc::new(source.clone()),
        Box::new(sink.clone()),
    )
    .unwrap();

    source
        .extend(vec![record("10"), record("20"), record("bad"), record("30")])
        .await;
    let (first_idx, first) = wait_for(&sink, 0, |r| r.had_data).await;
    assert_eq!(first.period_average, Some(20.0));
    assert_eq!(first.cumulative_average, Some(20.0));

    // At least one boundary passes with nothing new.
    let (empty_idx, empty) = wait_for(&sink, first_idx + 1, |r| !r.had_data).await;
    assert_eq!(empty.period_average, None);
    assert_eq!(empty.cumulative_average, Some(20.0));

    source.push(record("40")).await;
    let (_, second) = wait_for(&sink, empty_idx + 1, |r| r.had_data).await;
    assert_eq!(second.period_average, Some(40.0));
    assert_eq!(second.cumulative_average, Some(25.0));

    let stats = engine.shutdown().await.unwrap();
    assert_eq!(stats.final_state.total_count, 4);
    assert_eq!(stats.final_state.total_sum, 100.0);
    assert_eq!(stats.poller.records_read, 5);
    assert_eq!(stats.aggregator.values_skipped, 1);
}

#[tokio::test]
async fn test_boundaries_are_aligned_and_increasing() {
    let sink = MemorySink::new();
    let engine = StreamEngine::start(
        fast_config(100),
        Arc::new(MemorySource::new()),
        Box::new(sink.clone()),
    )
    .unwrap();

    wait_for(&sink, 2, |_| true).await;
    engine.shutdown().await.unwrap();

    let results = sink.results().await;
    for pair in results.windows(2) {
        let step = (pair[1].period_end - pair[0].period_end).num_milliseconds();
        assert!(step >= 100 && step % 100 == 0, "unaligned step {step}");
    }
    for result in &results {
        assert_eq!(result.period_end.timestamp_subsec_millis() % 100, 0);
        assert!(!result.had_data);
        assert_eq!(result.cumulative_average, None);
    }
}

#[tokio::test]
async fn test_shutdown_is_prompt_with_hourly_cadence() {
    let sink = MemorySink::new();
    let config = EngineConfig::new().with_poll_interval(Duration::from_millis(50));
    let engine = StreamEngine::start(
        config,
        Arc::new(MemorySource::new()),
        Box::new(sink.clone()),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = tokio::time::timeout(Duration::from_secs(2), engine.shutdown())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(stats.aggregator.periods, 0);
    assert!(stats.poller.polls >= 1);
    assert!(sink.results().await.is_empty());
}

#[tokio::test]
async fn test_unavailable_source_recovers_without_losing_records() {
    let source = MemorySource::new();
    let sink = MemorySink::new();
    source.set_available(false).await;
    source.extend(vec![record("2"), record("4")]).await;

    let engine = StreamEngine::start(
        fast_config(150),
        Arc::new(source.clone()),
        Box::new(sink.clone()),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    source.set_available(true).await;

    let (_, result) = wait_for(&sink, 0, |r| r.had_data).await;
    assert_eq!(result.period_average, Some(3.0));

    let stats = engine.shutdown().await.unwrap();
    assert!(stats.poller.source_errors >= 1);
    assert_eq!(stats.poller.records_read, 2);
    assert_eq!(stats.final_state.total_count, 2);
}

async fn wait_for_analyses(path: &Path, count: usize) -> Vec<String> {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let lines: Vec<String> = std::fs::read_to_string(path)
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect();
            if lines.iter().filter(|l| l.starts_with("Analysis at ")).count() >= count {
                return lines;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for report lines")
}

#[tokio::test]
async fn test_csv_file_to_report_file() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("time_series.csv");
    let output = dir.path().join("hourly_update.txt");
    std::fs::write(
        &input,
        "timestamp,value\n\
         2024-01-01 00:00:00,10\n\
         2024-01-01 00:00:10,20\n\
         2024-01-01 00:00:20,bad\n\
         2024-01-01 00:00:30,30\n",
    )
    .unwrap();

    let config = fast_config(300).with_output_path(&output);
    let sink = open_report_sink(&config).await.unwrap();
    let source = CsvSource::new(input.to_string_lossy().to_string()).unwrap();
    let engine = StreamEngine::start(config, Arc::new(source), Box::new(sink)).unwrap();

    let lines = wait_for_analyses(&output, 1).await;
    let first = lines
        .iter()
        .find(|l| l.starts_with("Analysis at "))
        .unwrap();
    assert!(first.ends_with("Total average: 20, Last 300 milliseconds average: 20"));

    let mut file = OpenOptions::new().append(true).open(&input).unwrap();
    file.write_all(b"2024-01-01 00:00:40,60\n").unwrap();
    drop(file);

    let lines = wait_for_analyses(&output, 2).await;
    engine.shutdown().await.unwrap();

    let analyses: Vec<_> = lines
        .iter()
        .filter(|l| l.starts_with("Analysis at "))
        .collect();
    assert!(analyses[1].ends_with("Total average: 30, Last 300 milliseconds average: 60"));
    for line in &lines {
        assert!(
            line.starts_with("Analysis at ")
                || line.starts_with("No data in the last 300 milliseconds at "),
            "unexpected line {line}"
        );
    }
}

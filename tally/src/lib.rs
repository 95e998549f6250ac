//! # tally - incremental streaming aggregation
//!
//! tally watches a growing table of `(timestamp, value)` measurements, buffers
//! new rows as they appear, and at calendar-aligned boundaries (by default at
//! the top of every hour) reports the average of the period together with the
//! running average of everything seen since start-up.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tally::engine::{open_report_sink, StreamEngine};
//! use tally::prelude::*;
//! use tally::sources::{open_source, ColumnMapping};
//!
//! # async fn example() -> tally::error::Result<()> {
//! let config = EngineConfig::new().with_output_path("hourly_update.txt");
//! let source = open_source("time_series.csv", ColumnMapping::default())?;
//! let sink = open_report_sink(&config).await?;
//!
//! let engine = StreamEngine::start(config, source, Box::new(sink))?;
//! tokio::signal::ctrl_c().await?;
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`sources`]: the [`DataSource`](sources::DataSource) trait with CSV,
//!   Parquet and in-memory adapters
//! - [`poller`]: reads new records on a fixed interval into the buffer
//! - [`buffer`]: the only state shared between the two background tasks
//! - [`trigger`]: wall-clock aligned aggregation boundaries
//! - [`aggregator`]: period and cumulative averages
//! - [`sink`] and [`formatters`]: append-only report output
//! - [`engine`]: starts and stops the pipeline
//!
//! Report lines look like:
//!
//! ```text
//! Analysis at 2024-06-01 12:00: Total average: 8.333333333333334, Last hour average: 15
//! No data in the last hour at 2024-06-01 13:00
//! ```

pub mod aggregator;
pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod formatters;
pub mod logging;
pub mod poller;
pub mod prelude;
pub mod sink;
pub mod sources;
pub mod trigger;

//! Data sources that the poller reads incrementally.
//!
//! A [`DataSource`] exposes a growing table of `(timestamp, value)` rows. The
//! engine never looks inside a source's storage; it only asks whether the
//! source has changed since a [`Marker`] and for the records appended after
//! it. File formats (CSV, Parquet) are read through DataFusion, and an
//! in-memory source is provided for embedding and tests.

use crate::prelude::*;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

mod csv;
mod memory;
mod parquet;
mod tabular;

pub use csv::{CsvOptions, CsvSource};
pub use memory::MemorySource;
pub use parquet::{ParquetOptions, ParquetSource};

/// Timestamp layouts accepted by [`Record::parse`].
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// A single measurement read from a data source.
///
/// `value` is `None` when the raw value could not be coerced to a finite
/// number.
/// Such records still travel through the buffer but never contribute to any
/// sum or count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: Option<NaiveDateTime>,
    pub value: Option<f64>,
}

impl Record {
    /// Creates a record. NaN and infinite values are stored as absent.
    pub fn new(timestamp: Option<NaiveDateTime>, value: Option<f64>) -> Self {
        Self {
            timestamp,
            value: value.filter(|v| v.is_finite()),
        }
    }

    /// Builds a record from raw text, applying the same coercion rules as the
    /// file sources: anything that is not a number becomes an absent value.
    pub fn parse(timestamp: &str, value: &str) -> Self {
        let timestamp = timestamp.trim();
        let timestamp = TIMESTAMP_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(timestamp, fmt).ok());
        Self::new(timestamp, value.trim().parse::<f64>().ok())
    }

    /// Returns the value if it is a finite number.
    pub fn numeric(&self) -> Option<f64> {
        self.value.filter(|v| v.is_finite())
    }
}

/// Opaque cursor into a data source: "everything up to here has been read".
///
/// A marker records how many rows were consumed and the size of the backing
/// store observed before those rows were read. Sources use the size to detect
/// growth and the row count to slice out new rows, so the two stay consistent
/// even when the store grows while it is being read.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Marker {
    rows: u64,
    bytes: u64,
}

impl Marker {
    /// Marker positioned before the first row.
    pub const START: Marker = Marker { rows: 0, bytes: 0 };

    /// Creates a marker from a row count and an observed store size.
    pub fn new(rows: u64, bytes: u64) -> Self {
        Self { rows, bytes }
    }

    /// Number of rows consumed.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Size of the backing store when the marker was taken.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// Names of the timestamp and value columns in a tabular source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub timestamp: String,
    pub value: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            timestamp: "timestamp".to_string(),
            value: "value".to_string(),
        }
    }
}

impl ColumnMapping {
    /// Creates a mapping for the given column names.
    pub fn new(timestamp: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            value: value.into(),
        }
    }
}

/// A growing table of measurements that can be read incrementally.
///
/// Implementations must keep [`changed`](DataSource::changed) and
/// [`read_since`](DataSource::read_since) consistent: once `read_since`
/// returned marker `m`, `changed(&m)` is false until new data arrives, and
/// `read_since(&m)` returns no records until then.
///
/// # Examples
///
/// ```rust,no_run
/// use tally::sources::{CsvSource, DataSource, Marker};
///
/// # async fn example() -> tally::error::Result<()> {
/// let source = CsvSource::new("data/time_series.csv")?;
/// if source.changed(&Marker::START).await? {
///     let (records, marker) = source.read_since(&Marker::START).await?;
///     println!("{} records, next marker {marker:?}", records.len());
/// }
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait DataSource: Debug + Send + Sync {
    /// Returns true if the source differs from what `marker` describes.
    async fn changed(&self, marker: &Marker) -> Result<bool>;

    /// Returns every record appended after `marker` together with the marker
    /// to use on the next call.
    ///
    /// Fails with [`TallyError::SourceUnavailable`] when the backing store
    /// cannot be read.
    async fn read_since(&self, marker: &Marker) -> Result<(Vec<Record>, Marker)>;

    /// Returns a marker positioned at the current end of the source.
    async fn end_marker(&self) -> Result<Marker> {
        let (_, marker) = self.read_since(&Marker::START).await?;
        Ok(marker)
    }

    /// Returns a human-readable description of this data source.
    fn description(&self) -> String;
}

/// File formats understood by [`open_source`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Parquet,
}

impl SourceFormat {
    /// Detects the format from a file extension.
    pub fn from_path(path: &str) -> Option<Self> {
        let lower = path.to_lowercase();
        if lower.ends_with(".csv") || lower.ends_with(".tsv") || lower.ends_with(".txt") {
            Some(Self::Csv)
        } else if lower.ends_with(".parquet") || lower.ends_with(".pq") {
            Some(Self::Parquet)
        } else {
            None
        }
    }
}

/// Opens a file source, choosing the reader from the file extension.
pub fn open_source(path: &str, columns: ColumnMapping) -> Result<Arc<dyn DataSource>> {
    match SourceFormat::from_path(path) {
        Some(SourceFormat::Csv) => {
            let delimiter = if path.to_lowercase().ends_with(".tsv") {
                b'\t'
            } else {
                b','
            };
            let options = CsvOptions {
                delimiter,
                columns,
                ..Default::default()
            };
            Ok(Arc::new(CsvSource::with_options(path, options)?))
        }
        Some(SourceFormat::Parquet) => {
            let options = ParquetOptions { columns };
            Ok(Arc::new(ParquetSource::with_options(path, options)?))
        }
        None => Err(TallyError::Configuration(format!(
            "Unsupported file type for '{path}': expected .csv, .tsv, .txt, .parquet or .pq"
        ))),
    }
}

/// Rejects paths that do not point at an existing file.
pub(crate) fn ensure_file_exists(path: &str, source_type: &str) -> Result<()> {
    if Path::new(path).is_file() {
        Ok(())
    } else {
        Err(TallyError::source_unavailable(
            source_type,
            format!("The file {path} was not found"),
        ))
    }
}

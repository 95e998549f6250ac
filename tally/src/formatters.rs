//! Rendering of period results for report sinks.
//!
//! Two formats are provided: the human-readable report line and one JSON
//! object per line.
//!
//! # Examples
//!
//! ```rust
//! use tally::formatters::{ReportFormatter, TextFormatter};
//! use tally::aggregator::PeriodResult;
//!
//! let formatter = TextFormatter::new("hour");
//! let result = PeriodResult {
//!     period_end: chrono::Local::now(),
//!     period_average: None,
//!     cumulative_average: None,
//!     had_data: false,
//! };
//! let line = formatter.format(&result).unwrap();
//! assert!(line.starts_with("No data in the last hour at "));
//! ```

use crate::aggregator::PeriodResult;
use crate::prelude::*;
use std::fmt::Write;

/// Timestamp layout used by the text report.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Output formats supported by the report sinks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// One human-readable line per period.
    #[default]
    Text,
    /// One JSON object per period.
    Json,
}

/// Trait for rendering a period result into a single report line.
pub trait ReportFormatter: Send + Sync {
    /// Formats a result without a trailing newline.
    fn format(&self, result: &PeriodResult) -> Result<String>;
}

/// Formats results as `Analysis at ...` / `No data in the last ...` lines.
#[derive(Debug, Clone)]
pub struct TextFormatter {
    period_label: String,
    timestamp_format: String,
}

impl TextFormatter {
    /// Creates a formatter naming each period with `period_label`.
    pub fn new(period_label: impl Into<String>) -> Self {
        Self {
            period_label: period_label.into(),
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }

    /// Sets the `strftime` layout used for the period timestamp.
    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = format.into();
        self
    }
}

impl ReportFormatter for TextFormatter {
    fn format(&self, result: &PeriodResult) -> Result<String> {
        let mut at = String::new();
        write!(at, "{}", result.period_end.format(&self.timestamp_format)).map_err(|_| {
            TallyError::Configuration(format!(
                "Invalid timestamp format '{}'",
                self.timestamp_format
            ))
        })?;
        match (result.had_data, result.period_average, result.cumulative_average) {
            (true, Some(period), Some(total)) => Ok(format!(
                "Analysis at {at}: Total average: {total}, Last {} average: {period}",
                self.period_label
            )),
            _ => Ok(format!("No data in the last {} at {at}", self.period_label)),
        }
    }
}

/// Formats results as JSON lines.
#[derive(Debug, Clone, Default)]
pub struct JsonFormatter;

impl JsonFormatter {
    /// Creates a new JSON formatter.
    pub fn new() -> Self {
        Self
    }
}

impl ReportFormatter for JsonFormatter {
    fn format(&self, result: &PeriodResult) -> Result<String> {
        serde_json::to_string(result).map_err(|e| TallyError::Serialization(e.to_string()))
    }
}

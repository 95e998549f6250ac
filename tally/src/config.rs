//! Engine configuration.

use chrono::format::{Item, StrftimeItems};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::formatters::{OutputFormat, DEFAULT_TIMESTAMP_FORMAT};
use crate::prelude::*;
use crate::trigger::Cadence;

/// Where the poller starts reading a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartPosition {
    /// Aggregate every row already present in the source.
    #[default]
    Beginning,
    /// Skip existing rows and only aggregate rows appended after start-up.
    End,
}

/// Configuration for a [`StreamEngine`](crate::engine::StreamEngine).
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use tally::config::EngineConfig;
/// use tally::trigger::Cadence;
///
/// let config = EngineConfig::new()
///     .with_poll_interval(Duration::from_secs(5))
///     .with_cadence(Cadence::Hourly { minute: 30 });
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    poll_interval: Duration,
    cadence: Cadence,
    check_interval: Duration,
    start_position: StartPosition,
    output_format: OutputFormat,
    output_path: PathBuf,
    timestamp_format: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    /// Create a configuration with the default settings.
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            cadence: Cadence::default(),
            check_interval: Duration::from_secs(1),
            start_position: StartPosition::default(),
            output_format: OutputFormat::default(),
            output_path: PathBuf::from("hourly_update.txt"),
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }

    /// Set how often the source is checked for new data.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set when aggregation boundaries occur.
    pub fn with_cadence(mut self, cadence: Cadence) -> Self {
        self.cadence = cadence;
        self
    }

    /// Set the longest sleep of the trigger between wall-clock checks.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Set where the poller starts reading.
    pub fn with_start_position(mut self, position: StartPosition) -> Self {
        self.start_position = position;
        self
    }

    /// Set the report format.
    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Set the report file.
    pub fn with_output_path(mut self, path: impl AsRef<Path>) -> Self {
        self.output_path = path.as_ref().to_path_buf();
        self
    }

    /// Set the `strftime` layout for timestamps in text reports.
    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = format.into();
        self
    }

    /// Get the poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Get the cadence.
    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    /// Get the trigger check interval.
    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Get the start position.
    pub fn start_position(&self) -> StartPosition {
        self.start_position
    }

    /// Get the report format.
    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }

    /// Get the report file path.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Get the text report timestamp layout.
    pub fn timestamp_format(&self) -> &str {
        &self.timestamp_format
    }

    /// Checks every setting.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::Configuration`] describing the first invalid
    /// setting.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(TallyError::Configuration(
                "Poll interval must be greater than zero".to_string(),
            ));
        }
        if self.check_interval.is_zero() {
            return Err(TallyError::Configuration(
                "Trigger check interval must be greater than zero".to_string(),
            ));
        }
        self.cadence.validate()?;

        if self.timestamp_format.is_empty()
            || StrftimeItems::new(&self.timestamp_format).any(|item| matches!(item, Item::Error))
        {
            return Err(TallyError::Configuration(format!(
                "Invalid timestamp format '{}'",
                self.timestamp_format
            )));
        }
        Ok(())
    }
}

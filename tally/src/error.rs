//! Error types for the tally streaming aggregation engine.
//!
//! All fallible operations in the crate return [`TallyError`]. Read failures
//! of a data source are reported as [`TallyError::SourceUnavailable`], which
//! the poller treats as transient.

use thiserror::Error;

/// The main error type for tally.
#[derive(Error, Debug)]
pub enum TallyError {
    /// The backing store of a data source could not be read.
    #[error("Data source unavailable ({source_type}): {message}")]
    SourceUnavailable {
        /// Type of data source (e.g., "csv", "parquet", "memory")
        source_type: String,
        /// Detailed error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Error from DataFusion operations.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error related to configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A result sink rejected a report.
    #[error("Sink error ({sink}): {message}")]
    Sink {
        /// Description of the sink
        sink: String,
        /// Detailed error message
        message: String,
    },

    /// Error from serialization operations.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, TallyError>`.
pub type Result<T> = std::result::Result<T, TallyError>;

impl TallyError {
    /// Creates a new source-unavailable error.
    pub fn source_unavailable(source_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_type: source_type.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new source-unavailable error wrapping an underlying error.
    pub fn source_unavailable_with_source(
        source_type: impl Into<String>,
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::SourceUnavailable {
            source_type: source_type.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Creates a new sink error.
    pub fn sink(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sink {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Returns true if retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SourceUnavailable { .. } | Self::Io(_))
    }
}

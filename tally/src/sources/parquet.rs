//! Parquet file source implementation.

use super::tabular::{self, TABLE};
use super::{ColumnMapping, DataSource, Marker, Record};
use crate::prelude::*;
use async_trait::async_trait;
use datafusion::prelude::*;
use tracing::instrument;

/// Options for configuring Parquet file reading.
#[derive(Debug, Clone, Default)]
pub struct ParquetOptions {
    /// Columns holding the timestamp and the measured value
    pub columns: ColumnMapping,
}

/// A Parquet file that is rewritten with more rows over time.
///
/// Parquet files cannot be appended in place, so growth shows up as a new
/// file size. Each read loads the file's current contents and returns the
/// rows past the marker.
#[derive(Debug, Clone)]
pub struct ParquetSource {
    path: String,
    options: ParquetOptions,
}

impl ParquetSource {
    /// Creates a new Parquet source from a file path.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        Self::with_options(path, ParquetOptions::default())
    }

    /// Creates a new Parquet source with custom options.
    pub fn with_options(path: impl Into<String>, options: ParquetOptions) -> Result<Self> {
        let path = path.into();
        super::ensure_file_exists(&path, "parquet")?;
        Ok(Self { path, options })
    }

    /// Returns the path of the file.
    pub fn path(&self) -> &str {
        &self.path
    }

    async fn read(&self, marker: &Marker) -> Result<(Vec<Record>, Marker)> {
        let bytes = tabular::file_len(&self.path, "parquet").await?;
        let ctx = tabular::session();

        let extension = std::path::Path::new(&self.path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_else(|| ".parquet".to_string());
        let options = ParquetReadOptions {
            file_extension: &extension,
            ..Default::default()
        };
        ctx.register_parquet(TABLE, self.path.as_str(), options)
            .await?;

        tabular::read_rows(&ctx, &self.options.columns, marker, bytes).await
    }
}

#[async_trait]
impl DataSource for ParquetSource {
    async fn changed(&self, marker: &Marker) -> Result<bool> {
        let bytes = tabular::file_len(&self.path, "parquet").await?;
        Ok(bytes != marker.bytes())
    }

    #[instrument(skip(self), fields(source.type = "parquet", source.path = %self.path))]
    async fn read_since(&self, marker: &Marker) -> Result<(Vec<Record>, Marker)> {
        self.read(marker)
            .await
            .map_err(|e| tabular::unavailable("parquet", &self.path, e))
    }

    fn description(&self) -> String {
        format!("Parquet file: {}", self.path)
    }
}

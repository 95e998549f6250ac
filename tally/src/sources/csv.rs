//! CSV file source implementation.

use super::tabular::{self, TABLE};
use super::{ColumnMapping, DataSource, Marker, Record};
use crate::prelude::*;
use async_trait::async_trait;
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::datasource::MemTable;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

/// Options for configuring CSV file reading.
#[derive(Debug, Clone)]
pub struct CsvOptions {
    /// Whether the CSV file has a header row
    pub has_header: bool,
    /// Field delimiter (default: ',')
    pub delimiter: u8,
    /// Quote character (default: '"')
    pub quote: u8,
    /// Columns holding the timestamp and the measured value
    pub columns: ColumnMapping,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            has_header: true,
            delimiter: b',',
            quote: b'"',
            columns: ColumnMapping::default(),
        }
    }
}

/// A CSV file that is appended to over time.
///
/// Every read takes a snapshot of the file, parses it up to the last line
/// break and slices off the rows already consumed with DataFusion. A last
/// line without a terminating line break is still being written and is left
/// for a later read. All columns are read as text and coerced in SQL, so a
/// non-numeric value anywhere in the file becomes an absent value instead of
/// a schema error.
///
/// # Examples
///
/// ```rust,no_run
/// use tally::sources::{CsvOptions, CsvSource};
///
/// # fn example() -> tally::error::Result<()> {
/// let source = CsvSource::new("data/time_series.csv")?;
///
/// let options = CsvOptions {
///     delimiter: b'\t',
///     ..Default::default()
/// };
/// let tsv = CsvSource::with_options("data/time_series.tsv", options)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CsvSource {
    path: String,
    options: CsvOptions,
    text_schema: OnceCell<SchemaRef>,
}

impl CsvSource {
    /// Creates a new CSV source from a file path.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        Self::with_options(path, CsvOptions::default())
    }

    /// Creates a new CSV source with custom options.
    pub fn with_options(path: impl Into<String>, options: CsvOptions) -> Result<Self> {
        let path = path.into();
        super::ensure_file_exists(&path, "csv")?;
        Ok(Self {
            path,
            options,
            text_schema: OnceCell::new(),
        })
    }

    /// Returns the path of the file.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn format(&self) -> Format {
        Format::default()
            .with_header(self.options.has_header)
            .with_delimiter(self.options.delimiter)
            .with_quote(self.options.quote)
    }

    /// Column names from the header, every column typed as nullable text.
    ///
    /// `complete` must end with a line break so the header is never taken
    /// from a half-written first line.
    async fn text_schema(&self, complete: &[u8]) -> Result<SchemaRef> {
        let schema = self
            .text_schema
            .get_or_try_init(|| async {
                let (inferred, _) = self.format().infer_schema(Cursor::new(complete), Some(1))?;
                let fields: Vec<Field> = inferred
                    .fields()
                    .iter()
                    .map(|field| Field::new(field.name(), DataType::Utf8, true))
                    .collect();
                debug!(columns = fields.len(), "Inferred CSV header");
                Ok::<_, TallyError>(Arc::new(Schema::new(fields)))
            })
            .await?;
        Ok(schema.clone())
    }

    async fn read(&self, marker: &Marker) -> Result<(Vec<Record>, Marker)> {
        let contents = tokio::fs::read(&self.path).await.map_err(|e| {
            TallyError::source_unavailable_with_source(
                "csv",
                format!("Failed to read {}", self.path),
                Box::new(e),
            )
        })?;
        let bytes = contents.len() as u64;

        let complete = complete_lines(&contents);
        if complete.len() < contents.len() {
            debug!(
                pending_bytes = contents.len() - complete.len(),
                "Ignoring unterminated last line"
            );
        }
        if complete.is_empty() {
            return Ok((Vec::new(), Marker::new(marker.rows(), bytes)));
        }

        let schema = self.text_schema(complete).await?;
        let batches = ReaderBuilder::new(schema.clone())
            .with_header(self.options.has_header)
            .with_delimiter(self.options.delimiter)
            .with_quote(self.options.quote)
            .build(Cursor::new(complete))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let ctx = tabular::session();
        ctx.register_table(TABLE, Arc::new(MemTable::try_new(schema, vec![batches])?))?;

        tabular::read_rows(&ctx, &self.options.columns, marker, bytes).await
    }
}

/// The prefix of `contents` up to and including its last line break.
///
/// A writer appending to the file may have flushed only part of the last
/// row; that row is left for a later read.
fn complete_lines(contents: &[u8]) -> &[u8] {
    match contents.iter().rposition(|&b| b == b'\n') {
        Some(end) => &contents[..=end],
        None => &[],
    }
}

#[async_trait]
impl DataSource for CsvSource {
    async fn changed(&self, marker: &Marker) -> Result<bool> {
        let bytes = tabular::file_len(&self.path, "csv").await?;
        Ok(bytes != marker.bytes())
    }

    #[instrument(skip(self), fields(source.type = "csv", source.path = %self.path))]
    async fn read_since(&self, marker: &Marker) -> Result<(Vec<Record>, Marker)> {
        self.read(marker)
            .await
            .map_err(|e| tabular::unavailable("csv", &self.path, e))
    }

    fn description(&self) -> String {
        format!("CSV file: {}", self.path)
    }
}

//! Append-only destinations for period reports.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::aggregator::PeriodResult;
use crate::formatters::ReportFormatter;
use crate::prelude::*;

/// Destination for aggregation results.
///
/// Each call to [`write`](ResultSink::write) adds exactly one entry and never
/// touches entries written before it. A failed write may leave part of an
/// entry behind; it is never completed, and the next entry starts on a fresh
/// line.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Appends one period result.
    async fn write(&mut self, result: &PeriodResult) -> Result<()>;

    /// Returns a human-readable description of this sink.
    fn description(&self) -> String;
}

/// Writes one formatted line per result to any async writer.
pub struct LineSink<W> {
    writer: W,
    formatter: Box<dyn ReportFormatter>,
    description: String,
    /// The last write stopped in the middle of a line.
    torn: bool,
}

impl<W> LineSink<W>
where
    W: AsyncWrite + Unpin + Send + Sync,
{
    /// Wraps a writer.
    pub fn new(
        writer: W,
        formatter: Box<dyn ReportFormatter>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            writer,
            formatter,
            description: description.into(),
            torn: false,
        }
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// A report file opened in append mode.
pub type FileSink = LineSink<tokio::fs::File>;

impl FileSink {
    /// Opens `path` for appending, creating it if necessary.
    #[instrument(skip(path, formatter), fields(path = %path.as_ref().display()))]
    pub async fn open(
        path: impl AsRef<Path>,
        formatter: Box<dyn ReportFormatter>,
    ) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        debug!("Opened report file");
        Ok(Self::new(file, formatter, format!("file: {}", path.display())))
    }
}

#[async_trait]
impl<W> ResultSink for LineSink<W>
where
    W: AsyncWrite + Unpin + Send + Sync,
{
    async fn write(&mut self, result: &PeriodResult) -> Result<()> {
        let formatted = self.formatter.format(result)?;
        let mut line = String::with_capacity(formatted.len() + 2);
        if self.torn {
            line.push('\n');
        }
        line.push_str(&formatted);
        line.push('\n');

        let sink_error =
            |e: std::io::Error| TallyError::sink(self.description.clone(), e.to_string());
        let bytes = line.as_bytes();
        let mut written = 0;
        while written < bytes.len() {
            match self.writer.write(&bytes[written..]).await {
                Ok(0) => {
                    self.torn |= written > 0;
                    return Err(sink_error(std::io::ErrorKind::WriteZero.into()));
                }
                Ok(n) => written += n,
                Err(e) => {
                    self.torn |= written > 0;
                    return Err(sink_error(e));
                }
            }
        }
        self.torn = false;
        self.writer.flush().await.map_err(sink_error)
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

/// Collects results in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    results: Arc<Mutex<Vec<PeriodResult>>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything written so far.
    pub async fn results(&self) -> Vec<PeriodResult> {
        self.results.lock().await.clone()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn write(&mut self, result: &PeriodResult) -> Result<()> {
        self.results.lock().await.push(result.clone());
        Ok(())
    }

    fn description(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatters::{JsonFormatter, TextFormatter};
    use chrono::Local;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempDir;

    fn empty_result() -> PeriodResult {
        PeriodResult {
            period_end: Local::now(),
            period_average: None,
            cumulative_average: None,
            had_data: false,
        }
    }

    fn full_result() -> PeriodResult {
        PeriodResult {
            period_end: Local::now(),
            period_average: Some(20.0),
            cumulative_average: Some(20.0),
            had_data: true,
        }
    }

    #[tokio::test]
    async fn test_file_sink_appends_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hourly_update.txt");
        std::fs::write(&path, "earlier report\n").unwrap();

        let mut sink = FileSink::open(&path, Box::new(TextFormatter::new("hour")))
            .await
            .unwrap();
        sink.write(&full_result()).await.unwrap();
        sink.write(&empty_result()).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "earlier report");
        assert!(lines[1].starts_with("Analysis at "));
        assert!(lines[1].ends_with("Total average: 20, Last hour average: 20"));
        assert!(lines[2].starts_with("No data in the last hour at "));
    }

    #[tokio::test]
    async fn test_line_sink_json() {
        let mut sink = LineSink::new(Vec::new(), Box::new(JsonFormatter::new()), "buffer");
        sink.write(&full_result()).await.unwrap();
        sink.write(&empty_result()).await.unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["had_data"], true);
    }

    /// Accepts the first `fail_after` bytes, then fails one write.
    struct FlakyWriter {
        data: Vec<u8>,
        fail_after: Option<usize>,
    }

    impl AsyncWrite for FlakyWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            match self.fail_after.take() {
                Some(0) => Poll::Ready(Err(io::Error::other("disk full"))),
                Some(limit) => {
                    let n = limit.min(buf.len());
                    self.data.extend_from_slice(&buf[..n]);
                    self.fail_after = Some(0);
                    Poll::Ready(Ok(n))
                }
                None => {
                    self.data.extend_from_slice(buf);
                    Poll::Ready(Ok(buf.len()))
                }
            }
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_partial_write_does_not_merge_lines() {
        let writer = FlakyWriter {
            data: Vec::new(),
            fail_after: Some(10),
        };
        let mut sink = LineSink::new(writer, Box::new(TextFormatter::new("hour")), "flaky");

        let failed = sink.write(&full_result()).await;
        assert!(matches!(failed, Err(TallyError::Sink { .. })));
        sink.write(&empty_result()).await.unwrap();
        sink.write(&full_result()).await.unwrap();

        let output = String::from_utf8(sink.into_inner().data).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Analysis a");
        assert!(lines[1].starts_with("No data in the last hour at "));
        assert!(lines[2].starts_with("Analysis at "));
    }

    #[tokio::test]
    async fn test_memory_sink_collects_results() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.write(&empty_result()).await.unwrap();
        writer.write(&full_result()).await.unwrap();

        let results = sink.results().await;
        assert_eq!(results.len(), 2);
        assert!(results[1].had_data);
        assert_eq!(writer.description(), "memory");
    }
}

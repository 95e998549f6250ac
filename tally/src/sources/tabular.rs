//! Shared incremental reader for file sources registered with DataFusion.

use super::{ColumnMapping, Marker, Record};
use crate::prelude::*;
use arrow::array::{Array, Float64Array, Int64Array, TimestampNanosecondArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::DateTime;
use datafusion::prelude::*;
use tracing::{debug, warn};

/// Name every file source registers its table under.
pub(crate) const TABLE: &str = "data";

/// Creates a context that scans files in a single partition, which keeps
/// rows in file order for `LIMIT`/`OFFSET` slicing.
pub(crate) fn session() -> SessionContext {
    SessionContext::new_with_config(SessionConfig::new().with_target_partitions(1))
}

/// Returns the current size of the file at `path`.
pub(crate) async fn file_len(path: &str, source_type: &str) -> Result<u64> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        TallyError::source_unavailable_with_source(
            source_type,
            format!("Failed to read metadata of {path}"),
            Box::new(e),
        )
    })?;
    Ok(metadata.len())
}

/// Converts any failure while reading a file into `SourceUnavailable`.
pub(crate) fn unavailable(source_type: &str, path: &str, err: TallyError) -> TallyError {
    match err {
        err @ TallyError::SourceUnavailable { .. } => err,
        other => TallyError::source_unavailable_with_source(
            source_type,
            format!("Failed to read {path}"),
            Box::new(other),
        ),
    }
}

/// Quotes a column name so DataFusion keeps its case and accepts keywords.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

async fn count_rows(ctx: &SessionContext) -> Result<u64> {
    let batches = ctx
        .sql(&format!("SELECT COUNT(*) AS row_count FROM {TABLE}"))
        .await?
        .collect()
        .await?;

    let count = match batches.first() {
        Some(batch) if batch.num_rows() > 0 => {
            let counts = batch
                .column(0)
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| TallyError::Internal("Expected Int64 array for count".into()))?;
            counts.value(0)
        }
        _ => 0,
    };
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Reads the rows after `marker` from the table registered in `ctx`.
///
/// `bytes` is the store size observed before the table was registered; it
/// becomes part of the returned marker.
pub(crate) async fn read_rows(
    ctx: &SessionContext,
    columns: &ColumnMapping,
    marker: &Marker,
    bytes: u64,
) -> Result<(Vec<Record>, Marker)> {
    let total = count_rows(ctx).await?;

    if total < marker.rows() {
        warn!(
            rows.previous = marker.rows(),
            rows.current = total,
            "Source has fewer rows than already consumed, re-anchoring at the new end"
        );
        return Ok((Vec::new(), Marker::new(total, bytes)));
    }

    let fresh = total - marker.rows();
    if fresh == 0 {
        return Ok((Vec::new(), Marker::new(total, bytes)));
    }

    let sql = format!(
        "SELECT TRY_CAST({ts} AS TIMESTAMP) AS ts, TRY_CAST({value} AS DOUBLE) AS value \
         FROM {TABLE} LIMIT {fresh} OFFSET {offset}",
        ts = quote_ident(&columns.timestamp),
        value = quote_ident(&columns.value),
        offset = marker.rows(),
    );
    let batches = ctx.sql(&sql).await?.collect().await?;

    let mut records = Vec::with_capacity(usize::try_from(fresh).unwrap_or(0));
    for batch in &batches {
        extend_records(&mut records, batch)?;
    }

    debug!(
        offset = marker.rows(),
        records = records.len(),
        "Read new rows"
    );
    let next = Marker::new(marker.rows() + records.len() as u64, bytes);
    Ok((records, next))
}

fn extend_records(records: &mut Vec<Record>, batch: &RecordBatch) -> Result<()> {
    let timestamps = cast(
        batch.column(0),
        &DataType::Timestamp(TimeUnit::Nanosecond, None),
    )?;
    let timestamps = timestamps
        .as_any()
        .downcast_ref::<TimestampNanosecondArray>()
        .ok_or_else(|| TallyError::Internal("Expected timestamp array".into()))?;

    let values = cast(batch.column(1), &DataType::Float64)?;
    let values = values
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| TallyError::Internal("Expected Float64 array for values".into()))?;

    for row in 0..batch.num_rows() {
        let timestamp = (!timestamps.is_null(row))
            .then(|| DateTime::from_timestamp_nanos(timestamps.value(row)).naive_utc());
        let value = (!values.is_null(row)).then(|| values.value(row));
        records.push(Record::new(timestamp, value));
    }
    Ok(())
}

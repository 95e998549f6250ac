//! Thread-safe accumulation point for records between aggregation cycles.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::sources::Record;

/// Records collected since the last drain.
///
/// The poller appends, the aggregation worker drains. Both operations take the
/// same lock for the length of a `Vec` move or extend, so a batch appended
/// concurrently with a drain lands wholly in this drain or wholly in the next.
/// Clones share the same buffer.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    records: Arc<Mutex<Vec<Record>>>,
}

impl RecordBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends records to the tail, preserving their order.
    pub async fn append(&self, records: Vec<Record>) {
        if records.is_empty() {
            return;
        }
        self.records.lock().await.extend(records);
    }

    /// Removes and returns everything currently buffered.
    pub async fn drain_all(&self) -> Vec<Record> {
        std::mem::take(&mut *self.records.lock().await)
    }

    /// Get the current number of buffered records.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Check if the buffer is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

impl Clone for RecordBuffer {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

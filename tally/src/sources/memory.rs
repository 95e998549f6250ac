//! In-memory data source.

use super::{DataSource, Marker, Record};
use crate::prelude::*;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug)]
struct MemoryState {
    records: Vec<Record>,
    available: bool,
}

/// An appendable, in-process source of records.
///
/// Clones share the same underlying table, so one handle can be given to the
/// engine while another keeps appending. The source can be switched
/// unavailable to simulate a backing store that cannot be read.
#[derive(Debug, Clone)]
pub struct MemorySource {
    state: Arc<RwLock<MemoryState>>,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState {
                records: Vec::new(),
                available: true,
            })),
        }
    }

    /// Appends one record.
    pub async fn push(&self, record: Record) {
        self.state.write().await.records.push(record);
    }

    /// Appends several records at once; readers see all of them or none.
    pub async fn extend(&self, records: impl IntoIterator<Item = Record>) {
        self.state.write().await.records.extend(records);
    }

    /// Marks the source readable or unreadable.
    pub async fn set_available(&self, available: bool) {
        self.state.write().await.available = available;
    }

    /// Number of records appended so far.
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Returns true if nothing was appended yet.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }
}

fn offline() -> TallyError {
    TallyError::source_unavailable("memory", "Source is marked unavailable")
}

#[async_trait]
impl DataSource for MemorySource {
    async fn changed(&self, marker: &Marker) -> Result<bool> {
        let state = self.state.read().await;
        if !state.available {
            return Err(offline());
        }
        Ok(state.records.len() as u64 != marker.rows())
    }

    async fn read_since(&self, marker: &Marker) -> Result<(Vec<Record>, Marker)> {
        let state = self.state.read().await;
        if !state.available {
            return Err(offline());
        }

        let total = state.records.len();
        let start = usize::try_from(marker.rows()).unwrap_or(usize::MAX).min(total);
        let records = state.records[start..].to_vec();
        Ok((records, Marker::new(total as u64, total as u64)))
    }

    fn description(&self) -> String {
        "In-memory source".to_string()
    }
}

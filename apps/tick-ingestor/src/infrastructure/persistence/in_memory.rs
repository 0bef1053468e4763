//! In-Memory Tick Store
//!
//! Map-backed [`TickStore`] with the same semantics as the PostgreSQL
//! adapter: a batch is applied atomically, the key is unique, and the
//! last write wins. Queued faults make the next writes fail without
//! touching the stored rows.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;

use crate::application::ports::{TickStore, WriteError};
use crate::domain::row::{CanonicalRow, RowKey, dedupe_last_wins};

/// In-memory daily table.
#[derive(Debug, Default)]
pub struct InMemoryTickStore {
    rows: Mutex<HashMap<RowKey, CanonicalRow>>,
    faults: Mutex<VecDeque<WriteError>>,
    attempts: AtomicU64,
    commits: AtomicU64,
}

impl InMemoryTickStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next write fail with `error`. Faults queue in order.
    pub fn fail_next(&self, error: WriteError) {
        self.faults.lock().push_back(error);
    }

    /// Stored row for a key.
    #[must_use]
    pub fn get(&self, instrument_token: i64, timestamp: NaiveDateTime) -> Option<CanonicalRow> {
        self.rows.lock().get(&(instrument_token, timestamp)).cloned()
    }

    /// All stored rows ordered by key.
    #[must_use]
    pub fn rows(&self) -> Vec<CanonicalRow> {
        let mut rows: Vec<CanonicalRow> = self.rows.lock().values().cloned().collect();
        rows.sort_by_key(CanonicalRow::key);
        rows
    }

    /// Number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// Calls to `write_batch`, failed ones included.
    #[must_use]
    pub fn write_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Batches committed.
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TickStore for InMemoryTickStore {
    async fn write_batch(&self, rows: &[CanonicalRow]) -> Result<usize, WriteError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if let Some(fault) = self.faults.lock().pop_front() {
            return Err(fault);
        }
        if rows.is_empty() {
            return Ok(0);
        }

        let rows = dedupe_last_wins(rows);
        let written = rows.len();
        let mut stored = self.rows.lock();
        for row in rows {
            stored.insert(row.key(), row);
        }
        drop(stored);

        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(written)
    }
}

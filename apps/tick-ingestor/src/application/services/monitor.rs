//! Session Monitor
//!
//! Lock-light shared view of the running session, written by the session
//! controller and read by the health endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::application::services::BatchReport;
use crate::domain::session::SessionState;

/// Shared session status.
#[derive(Debug)]
pub struct SessionMonitor {
    state: RwLock<SessionState>,
    started_at: Instant,
    last_batch_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    batches: AtomicU64,
    ticks_received: AtomicU64,
    rows_written: AtomicU64,
    rows_dropped: AtomicU64,
    failed_batches: AtomicU64,
    reconnects: AtomicU64,
}

impl Default for SessionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMonitor {
    /// Create a monitor in `Disconnected`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SessionState::Disconnected),
            started_at: Instant::now(),
            last_batch_at: RwLock::new(None),
            last_error: RwLock::new(None),
            batches: AtomicU64::new(0),
            ticks_received: AtomicU64::new(0),
            rows_written: AtomicU64::new(0),
            rows_dropped: AtomicU64::new(0),
            failed_batches: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    /// Set the session state.
    pub fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Record the outcome of one batch.
    pub fn record_batch(&self, report: &BatchReport) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.ticks_received
            .fetch_add(report.received as u64, Ordering::Relaxed);
        self.rows_written
            .fetch_add(report.written as u64, Ordering::Relaxed);
        self.rows_dropped
            .fetch_add(report.dropped() as u64, Ordering::Relaxed);
        if report.is_lost() {
            self.failed_batches.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_batch_at.write() = Some(Utc::now());
    }

    /// Record a reconnection attempt.
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Remember the most recent error.
    pub fn set_error(&self, message: impl Into<String>) {
        *self.last_error.write() = Some(message.into());
    }

    /// Point-in-time copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            last_batch_at: *self.last_batch_at.read(),
            last_error: self.last_error.read().clone(),
            batches: self.batches.load(Ordering::Relaxed),
            ticks_received: self.ticks_received.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            rows_dropped: self.rows_dropped.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Session state.
    pub state: SessionState,
    /// Seconds since the monitor was created.
    pub uptime_secs: u64,
    /// Time the last batch was processed.
    pub last_batch_at: Option<DateTime<Utc>>,
    /// Most recent error message.
    pub last_error: Option<String>,
    /// Batches processed.
    pub batches: u64,
    /// Ticks received.
    pub ticks_received: u64,
    /// Rows committed.
    pub rows_written: u64,
    /// Ticks dropped during normalization.
    pub rows_dropped: u64,
    /// Batches lost.
    pub failed_batches: u64,
    /// Feed reconnection attempts.
    pub reconnects: u64,
}

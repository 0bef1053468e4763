//! Batch Processing Service
//!
//! Normalizes one feed batch and upserts the resulting rows as a single
//! write. Per-tick failures never escalate past the batch and a lost
//! batch never escalates past this service: the caller always gets a
//! [`BatchReport`] back and the session keeps receiving.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::application::ports::{IngestMetrics, NoopMetrics, Notifier, TickStore, WriteError};
use crate::domain::catalog::Catalog;
use crate::domain::normalizer::{NormalizationErrorKind, normalize};
use crate::domain::row::CanonicalRow;
use crate::domain::tick::RawTick;

// =============================================================================
// Retry Policy
// =============================================================================

/// What to do when a batch write fails.
///
/// The default performs no retry: a failed batch is logged with its
/// payload, operators are notified and the batch is not resent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchRetryPolicy {
    /// Extra attempts after the first one.
    pub retries: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl BatchRetryPolicy {
    /// No retry.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            retries: 0,
            delay: Duration::ZERO,
        }
    }

    /// Bounded retry.
    #[must_use]
    pub const fn bounded(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed
    /// with `error`.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32, error: &WriteError) -> bool {
        attempt <= self.retries && error.is_transient()
    }
}

// =============================================================================
// Report
// =============================================================================

/// Outcome of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Ticks in the batch.
    pub received: usize,
    /// Rows committed.
    pub written: usize,
    /// Ticks dropped for an unmapped token.
    pub unknown_instrument: usize,
    /// Ticks dropped for a missing required field.
    pub malformed: usize,
    /// Rows lost because the write failed.
    pub failed: usize,
}

impl BatchReport {
    /// Ticks dropped during normalization.
    #[must_use]
    pub const fn dropped(&self) -> usize {
        self.unknown_instrument + self.malformed
    }

    /// Whether the write was lost.
    #[must_use]
    pub const fn is_lost(&self) -> bool {
        self.failed > 0
    }
}

// =============================================================================
// Processor
// =============================================================================

/// A normalized batch waiting to be written.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    rows: Vec<CanonicalRow>,
    report: BatchReport,
}

impl PreparedBatch {
    /// Rows that survived normalization.
    #[must_use]
    pub fn rows(&self) -> &[CanonicalRow] {
        &self.rows
    }

    /// Normalization outcome so far (nothing written yet).
    #[must_use]
    pub const fn report(&self) -> BatchReport {
        self.report
    }
}

/// Normalize-then-write pipeline for one batch at a time.
pub struct BatchProcessor {
    catalog: Arc<Catalog>,
    store: Arc<dyn TickStore>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<dyn IngestMetrics>,
    retry: BatchRetryPolicy,
}

impl BatchProcessor {
    /// Create a processor over an immutable catalog.
    #[must_use]
    pub fn new(
        catalog: Arc<Catalog>,
        store: Arc<dyn TickStore>,
        notifier: Arc<dyn Notifier>,
        retry: BatchRetryPolicy,
    ) -> Self {
        Self {
            catalog,
            store,
            notifier,
            metrics: Arc::new(NoopMetrics),
            retry,
        }
    }

    /// Report measurements to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn IngestMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Catalog used for normalization.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Normalize and write one batch.
    pub async fn process(&self, ticks: &[RawTick]) -> BatchReport {
        let batch = self.prepare(ticks);
        self.write(&batch).await
    }

    /// Normalize a batch, dropping ticks that cannot become rows.
    #[must_use]
    pub fn prepare(&self, ticks: &[RawTick]) -> PreparedBatch {
        let mut report = BatchReport {
            received: ticks.len(),
            ..BatchReport::default()
        };
        self.metrics.ticks_received(ticks.len() as u64);

        let mut rows = Vec::with_capacity(ticks.len());
        for tick in ticks {
            match normalize(tick, &self.catalog) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    tracing::warn!(
                        instrument_token = %e.token(),
                        reason = %e.kind(),
                        error = %e,
                        "Dropping tick"
                    );
                    self.metrics.row_dropped(e.kind());
                    match e.kind() {
                        NormalizationErrorKind::UnknownInstrument => report.unknown_instrument += 1,
                        NormalizationErrorKind::MalformedTick => report.malformed += 1,
                    }
                }
            }
        }

        PreparedBatch { rows, report }
    }

    /// Write a prepared batch as one upsert, reporting it if lost.
    pub async fn write(&self, batch: &PreparedBatch) -> BatchReport {
        let mut report = batch.report;
        if batch.rows.is_empty() {
            return report;
        }

        match self.write_with_retry(&batch.rows).await {
            Ok(written) => {
                report.written = written;
                self.metrics.rows_written(written as u64);
                tracing::debug!(received = report.received, written, "Batch written");
            }
            Err(e) => {
                report.failed = batch.rows.len();
                self.report_lost_batch(&batch.rows, &e);
            }
        }

        report
    }

    /// Account for a batch whose write was dropped at shutdown.
    pub fn abandon(&self, batch: &PreparedBatch, grace: Duration) -> BatchReport {
        let mut report = batch.report;
        if !batch.rows.is_empty() {
            report.failed = batch.rows.len();
            self.report_lost_batch(&batch.rows, &WriteError::Abandoned { grace });
        }
        report
    }

    async fn write_with_retry(&self, rows: &[CanonicalRow]) -> Result<usize, WriteError> {
        let mut attempt = 1;
        loop {
            let started = Instant::now();
            let result = self.store.write_batch(rows).await;
            self.metrics.batch_write_duration(started.elapsed());

            match result {
                Ok(written) => return Ok(written),
                Err(e) if self.retry.should_retry(attempt, &e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.retry.retries + 1,
                        error = %e,
                        "Batch write failed, retrying"
                    );
                    self.metrics.batch_retried();
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn report_lost_batch(&self, rows: &[CanonicalRow], error: &WriteError) {
        let payload = serde_json::to_string(rows)
            .unwrap_or_else(|e| format!("<unserializable batch: {e}>"));
        tracing::error!(
            rows = rows.len(),
            error = %error,
            error_type = error.kind(),
            batch = %payload,
            "Batch write failed, batch lost"
        );
        self.metrics.batch_lost(error.kind());

        self.notifier.notify(
            "Tick batch write failed",
            &format!(
                "A batch of {} rows could not be written to the daily table: {error}. \
                 The session continues; the rows are in the error log.",
                rows.len()
            ),
        );
    }
}

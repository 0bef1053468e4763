//! Ingest Metrics Port (Driven Port)
//!
//! Counters and gauges the services report. The Prometheus adapter lives
//! in infrastructure; [`NoopMetrics`] is the default until one is wired.

use std::time::Duration;

use crate::domain::normalizer::NormalizationErrorKind;
use crate::domain::session::SessionState;

/// Sink for pipeline measurements. Calls must not block.
#[cfg_attr(test, mockall::automock)]
pub trait IngestMetrics: Send + Sync {
    /// Ticks received in one feed batch.
    fn ticks_received(&self, count: u64);
    /// A tick dropped by the normalizer.
    fn row_dropped(&self, kind: NormalizationErrorKind);
    /// Rows committed by one batch.
    fn rows_written(&self, count: u64);
    /// A batch lost, labelled with the write error kind.
    fn batch_lost(&self, error_kind: &'static str);
    /// A batch write retry.
    fn batch_retried(&self);
    /// Duration of one write attempt.
    fn batch_write_duration(&self, duration: Duration);
    /// Session state change.
    fn session_state(&self, state: SessionState);
    /// Feed reconnection attempt.
    fn reconnect(&self);
    /// Error reported by the feed.
    fn feed_error(&self, error_type: &str);
}

/// Discards every measurement.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl IngestMetrics for NoopMetrics {
    fn ticks_received(&self, _count: u64) {}
    fn row_dropped(&self, _kind: NormalizationErrorKind) {}
    fn rows_written(&self, _count: u64) {}
    fn batch_lost(&self, _error_kind: &'static str) {}
    fn batch_retried(&self) {}
    fn batch_write_duration(&self, _duration: Duration) {}
    fn session_state(&self, _state: SessionState) {}
    fn reconnect(&self) {}
    fn feed_error(&self, _error_type: &str) {}
}

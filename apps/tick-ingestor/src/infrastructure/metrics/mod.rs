//! Prometheus Metrics Module
//!
//! Exposes ingestion metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ticks**: Ticks received from the feed, rows dropped by reason
//! - **Batches**: Rows written, failed batches, retries, write latency
//! - **Session**: Current session state, feed reconnects, feed errors
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Services
//! record through [`PrometheusMetrics`], which is a no-op until
//! [`init_metrics`] installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::ports::IngestMetrics;
use crate::domain::normalizer::NormalizationErrorKind;
use crate::domain::session::SessionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling this again returns the already installed handle.
///
/// # Errors
///
/// Returns `BuildError` if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Tick counters
    describe_counter!(
        "tick_ingestor_ticks_received_total",
        "Total ticks received from the feed"
    );
    describe_counter!(
        "tick_ingestor_rows_dropped_total",
        "Total ticks dropped during normalization by reason"
    );

    // Batch counters
    describe_counter!(
        "tick_ingestor_rows_written_total",
        "Total canonical rows upserted into the daily table"
    );
    describe_counter!(
        "tick_ingestor_batch_failures_total",
        "Total batches lost after all write attempts"
    );
    describe_counter!(
        "tick_ingestor_batch_retries_total",
        "Total batch write retries"
    );

    // Session
    describe_gauge!(
        "tick_ingestor_session_state",
        "Current session state (0=disconnected .. 5=stopped, 6=failed)"
    );
    describe_counter!(
        "tick_ingestor_feed_reconnects_total",
        "Total feed reconnection attempts"
    );
    describe_counter!(
        "tick_ingestor_feed_errors_total",
        "Total feed errors by type"
    );

    // Latency histograms
    describe_histogram!(
        "tick_ingestor_batch_write_seconds",
        "Time to upsert one batch"
    );
}

// =============================================================================
// Recording Adapter
// =============================================================================

/// [`IngestMetrics`] backed by the global `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusMetrics;

impl IngestMetrics for PrometheusMetrics {
    fn ticks_received(&self, count: u64) {
        counter!("tick_ingestor_ticks_received_total").increment(count);
    }

    fn row_dropped(&self, kind: NormalizationErrorKind) {
        counter!("tick_ingestor_rows_dropped_total", "reason" => kind.as_str()).increment(1);
    }

    fn rows_written(&self, count: u64) {
        counter!("tick_ingestor_rows_written_total").increment(count);
    }

    fn batch_lost(&self, error_kind: &'static str) {
        counter!("tick_ingestor_batch_failures_total", "error_type" => error_kind).increment(1);
    }

    fn batch_retried(&self) {
        counter!("tick_ingestor_batch_retries_total").increment(1);
    }

    fn batch_write_duration(&self, duration: Duration) {
        histogram!("tick_ingestor_batch_write_seconds").record(duration.as_secs_f64());
    }

    fn session_state(&self, state: SessionState) {
        gauge!("tick_ingestor_session_state").set(f64::from(state.code()));
    }

    fn reconnect(&self) {
        counter!("tick_ingestor_feed_reconnects_total").increment(1);
    }

    fn feed_error(&self, error_type: &str) {
        record_feed_error(error_type);
    }
}

/// Record a feed error; also used directly by the feed adapter.
pub fn record_feed_error(error_type: &str) {
    counter!(
        "tick_ingestor_feed_errors_total",
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        let metrics = PrometheusMetrics;
        metrics.ticks_received(3);
        metrics.row_dropped(NormalizationErrorKind::UnknownInstrument);
        metrics.batch_lost("abandoned");
        metrics.session_state(SessionState::Receiving);
        metrics.batch_write_duration(Duration::from_millis(5));
        record_feed_error("codec");
    }
}

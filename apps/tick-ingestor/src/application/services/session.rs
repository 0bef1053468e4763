//! Stream Session Controller
//!
//! Owns one trading-day session: credential, feed lifecycle, sequential
//! batch dispatch and the scheduled shutdown.
//!
//! # Concurrency
//!
//! - Batches are processed one at a time, in arrival order, on the
//!   controller task. A newer batch can never be written before an older
//!   one.
//! - The cutoff timer runs on its own task and only cancels the shared
//!   shutdown token. Cancelling is idempotent, so the timer, Ctrl+C and
//!   SIGTERM all use the same stop path.
//! - The shutdown token is checked between batches. A write in flight
//!   when it fires gets `shutdown_grace` to finish before it is
//!   abandoned. An abandoned write rolls back as a whole and is reported
//!   like any other lost batch.
//! - The feed runs on a separate token that is only cancelled after the
//!   in-flight batch has been handled.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::ports::{
    AccessToken, Clock, FeedError, FeedEvent, IngestMetrics, NoopMetrics, Notifier,
    SessionProvider, TickFeed,
};
use crate::application::services::{BatchProcessor, BatchReport, SessionMonitor};
use crate::domain::session::{SessionState, SessionStateMachine};
use crate::domain::tick::RawTick;

// =============================================================================
// Errors
// =============================================================================

/// Session-level failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The credential source has no valid token.
    #[error("no access credential available")]
    NoCredential,
    /// The configured cutoff is not in the future.
    #[error("shutdown cutoff {cutoff} is not after current time {now}")]
    PastCutoff {
        /// Configured cutoff.
        cutoff: DateTime<Utc>,
        /// Time the session tried to start.
        now: DateTime<Utc>,
    },
    /// The credential source could not be queried.
    #[error("credential lookup failed: {0}")]
    CredentialLookup(String),
    /// The feed ended before the cutoff.
    #[error("feed terminated: {0}")]
    FeedTerminated(String),
}

impl From<FeedError> for SessionError {
    fn from(error: FeedError) -> Self {
        Self::FeedTerminated(error.to_string())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Session controller settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wall-clock time at which the session stops.
    pub cutoff: DateTime<Utc>,
    /// Time allowed for the in-flight write after shutdown fires.
    pub shutdown_grace: Duration,
    /// Attempts at obtaining the credential.
    pub credential_attempts: u32,
    /// Pause between credential attempts.
    pub credential_retry_delay: Duration,
    /// Capacity of the feed event channel.
    pub event_buffer: usize,
}

impl SessionConfig {
    /// Settings with defaults for everything but the cutoff.
    #[must_use]
    pub const fn new(cutoff: DateTime<Utc>) -> Self {
        Self {
            cutoff,
            shutdown_grace: Duration::from_secs(10),
            credential_attempts: 3,
            credential_retry_delay: Duration::from_secs(1),
            event_buffer: 1024,
        }
    }
}

// =============================================================================
// Report
// =============================================================================

/// Summary of a completed session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    /// Run identifier used in logs.
    pub run_id: Uuid,
    /// Final state.
    pub final_state: SessionState,
    /// Batches processed.
    pub batches: u64,
    /// Aggregated batch outcome.
    pub totals: BatchReport,
    /// Times the feed fell back to disconnected.
    pub reconnects: u64,
}

/// Why the receive loop ended.
enum LoopExit {
    Shutdown,
    FeedEnded,
}

// =============================================================================
// Controller
// =============================================================================

/// Drives one ingestion session from credential to shutdown.
pub struct SessionController {
    provider: Arc<dyn SessionProvider>,
    feed: Arc<dyn TickFeed>,
    processor: BatchProcessor,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    monitor: Arc<SessionMonitor>,
    metrics: Arc<dyn IngestMetrics>,
    config: SessionConfig,
    machine: SessionStateMachine,
    run_id: Uuid,
    batches: u64,
    totals: BatchReport,
}

impl SessionController {
    /// Create a controller.
    #[must_use]
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        feed: Arc<dyn TickFeed>,
        processor: BatchProcessor,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        monitor: Arc<SessionMonitor>,
        config: SessionConfig,
    ) -> Self {
        Self {
            provider,
            feed,
            processor,
            notifier,
            clock,
            monitor,
            metrics: Arc::new(NoopMetrics),
            config,
            machine: SessionStateMachine::new(),
            run_id: Uuid::new_v4(),
            batches: 0,
            totals: BatchReport::default(),
        }
    }

    /// Report measurements to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn IngestMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run the session until the cutoff, `shutdown`, or a fatal error.
    ///
    /// # Errors
    ///
    /// - [`SessionError::PastCutoff`] if the cutoff has already passed.
    /// - [`SessionError::NoCredential`] / [`SessionError::CredentialLookup`]
    ///   if no credential could be obtained.
    /// - [`SessionError::FeedTerminated`] if the feed ended before the cutoff.
    #[tracing::instrument(skip_all, fields(run_id = %self.run_id))]
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<SessionReport, SessionError> {
        let now = self.clock.now();
        if self.config.cutoff <= now {
            let error = SessionError::PastCutoff {
                cutoff: self.config.cutoff,
                now,
            };
            return Err(self.fail_start(error));
        }

        self.advance(SessionState::Connecting);
        let access_token = match self.acquire_credential().await {
            Ok(token) => token,
            Err(e) => return Err(self.fail_start(e)),
        };

        let instruments = self.processor.catalog().subscriptions().to_vec();
        tracing::info!(
            instruments = instruments.len(),
            cutoff = %self.config.cutoff,
            "Starting ingestion session"
        );
        self.notifier.notify(
            "Tick ingestion session started",
            &format!(
                "Run {} subscribed {} instruments; scheduled stop at {}.",
                self.run_id,
                instruments.len(),
                self.config.cutoff
            ),
        );

        let timer = self.arm_cutoff_timer(&shutdown);

        let feed_cancel = CancellationToken::new();
        let (events_tx, mut events_rx) = mpsc::channel(self.config.event_buffer.max(1));
        let feed = Arc::clone(&self.feed);
        let feed_token = feed_cancel.clone();
        let mut feed_task = tokio::spawn(async move {
            feed.run(access_token, instruments, events_tx, feed_token)
                .await
        });

        let exit = loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break LoopExit::Shutdown,
                event = events_rx.recv() => match event {
                    Some(event) => self.handle_event(event, &shutdown).await,
                    None => break LoopExit::FeedEnded,
                },
            }
        };
        timer.abort();

        match exit {
            LoopExit::Shutdown => {
                self.advance(SessionState::ShuttingDown);
                tracing::info!("Shutdown requested, stopping feed");
                feed_cancel.cancel();
                drop(events_rx);
                match tokio::time::timeout(self.config.shutdown_grace, &mut feed_task).await {
                    Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Feed ended with error during shutdown"),
                    Ok(Err(e)) => tracing::warn!(error = %e, "Feed task panicked during shutdown"),
                    Err(_) => {
                        tracing::warn!("Feed did not stop within grace period, aborting");
                        feed_task.abort();
                    }
                    Ok(Ok(Ok(()))) => {}
                }
                self.advance(SessionState::Stopped);
                let report = self.report();
                tracing::info!(
                    batches = report.batches,
                    written = report.totals.written,
                    dropped = report.totals.dropped(),
                    failed = report.totals.failed,
                    "Session stopped"
                );
                Ok(report)
            }
            LoopExit::FeedEnded => {
                let error = match feed_task.await {
                    Ok(Err(e)) => SessionError::from(e),
                    Ok(Ok(())) => SessionError::FeedTerminated("feed stopped unexpectedly".to_string()),
                    Err(e) => SessionError::FeedTerminated(format!("feed task failed: {e}")),
                };
                Err(self.fail_running(error))
            }
        }
    }

    async fn acquire_credential(&self) -> Result<AccessToken, SessionError> {
        let attempts = self.config.credential_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.provider.latest_token().await {
                Ok(Some(token)) if !token.is_blank() => return Ok(token),
                Ok(_) => return Err(SessionError::NoCredential),
                Err(e) if attempt < attempts => {
                    tracing::warn!(attempt, attempts, error = %e, "Credential lookup failed, retrying");
                    tokio::time::sleep(self.config.credential_retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Credential acquisition may have taken a while, so the remaining time
    /// is measured now rather than at start.
    fn arm_cutoff_timer(&self, shutdown: &CancellationToken) -> JoinHandle<()> {
        let remaining = (self.config.cutoff - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(remaining) => {
                    tracing::info!("Market close reached");
                    shutdown.cancel();
                }
                () = shutdown.cancelled() => {}
            }
        })
    }

    async fn handle_event(&mut self, event: FeedEvent, shutdown: &CancellationToken) {
        match event {
            FeedEvent::Connecting { attempt } => {
                if attempt > 1 {
                    self.monitor.record_reconnect();
                    self.metrics.reconnect();
                }
                tracing::debug!(attempt, "Feed connecting");
                self.advance(SessionState::Connecting);
            }
            FeedEvent::Connected => tracing::info!("Feed connected"),
            FeedEvent::Subscribed { instruments } => {
                tracing::info!(instruments, "Subscribed to full instrument set");
                self.advance(SessionState::Subscribed);
            }
            FeedEvent::Ticks(ticks) => {
                self.advance(SessionState::Receiving);
                self.process_batch(&ticks, shutdown).await;
            }
            FeedEvent::Disconnected { reason } => {
                tracing::warn!(reason = %reason, "Feed disconnected");
                self.monitor.set_error(reason);
                self.advance(SessionState::Disconnected);
            }
            FeedEvent::Error(message) => {
                tracing::warn!(error = %message, "Feed error");
                self.metrics.feed_error("server");
                self.monitor.set_error(message);
            }
        }
    }

    async fn process_batch(&mut self, ticks: &[RawTick], shutdown: &CancellationToken) {
        let grace = self.config.shutdown_grace;
        let grace_expired = async {
            shutdown.cancelled().await;
            tokio::time::sleep(grace).await;
        };

        let batch = self.processor.prepare(ticks);
        let report = tokio::select! {
            report = self.processor.write(&batch) => report,
            () = grace_expired => self.processor.abandon(&batch, grace),
        };

        self.batches += 1;
        self.totals.received += report.received;
        self.totals.written += report.written;
        self.totals.unknown_instrument += report.unknown_instrument;
        self.totals.malformed += report.malformed;
        self.totals.failed += report.failed;
        self.monitor.record_batch(&report);
    }

    fn advance(&mut self, next: SessionState) {
        if self.machine.state() == next && next != SessionState::Receiving {
            return;
        }
        match self.machine.transition(next) {
            Ok(previous) => {
                if previous != next {
                    tracing::debug!(from = %previous, to = %next, "Session state changed");
                    self.monitor.set_state(next);
                    self.metrics.session_state(next);
                }
            }
            Err(e) => tracing::debug!(error = %e, "Ignoring session transition"),
        }
    }

    fn fail_start(&mut self, error: SessionError) -> SessionError {
        tracing::error!(error = %error, "Session refused to start");
        self.advance(SessionState::Failed);
        self.monitor.set_error(error.to_string());
        self.notifier.notify(
            "Tick ingestion session failed to start",
            &format!("Run {}: {error}", self.run_id),
        );
        error
    }

    fn fail_running(&mut self, error: SessionError) -> SessionError {
        tracing::error!(
            error = %error,
            batches = self.batches,
            written = self.totals.written,
            "Session terminated abnormally"
        );
        self.advance(SessionState::Failed);
        self.monitor.set_error(error.to_string());
        self.notifier.notify(
            "Tick ingestion session terminated abnormally",
            &format!(
                "Run {}: {error}. {} batches processed, {} rows written before termination.",
                self.run_id, self.batches, self.totals.written
            ),
        );
        error
    }

    fn report(&self) -> SessionReport {
        SessionReport {
            run_id: self.run_id,
            final_state: self.machine.state(),
            batches: self.batches,
            totals: self.totals,
            reconnects: self.machine.reconnects(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{NaiveDate, TimeDelta};
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::{
        MockIngestMetrics, MockSessionProvider, MockTickFeed, MockTickStore, SystemClock,
    };
    use crate::application::services::BatchRetryPolicy;
    use crate::domain::catalog::{Catalog, CatalogEntry, InstrumentToken};

    #[derive(Default)]
    struct RecordingNotifier {
        subjects: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, subject: &str, _body: &str) {
            self.subjects.lock().unwrap().push(subject.to_string());
        }
    }

    fn catalog() -> Arc<Catalog> {
        Arc::new(
            Catalog::builder()
                .entry(
                    InstrumentToken::new(408_065),
                    CatalogEntry::new("infy", "equity_db", "INFY", false),
                )
                .subscriptions([InstrumentToken::new(408_065)])
                .build(),
        )
    }

    fn tick() -> RawTick {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap();
        RawTick::index(InstrumentToken::new(408_065), Decimal::new(150_025, 2), ts)
    }

    /// Replays fixed events, then idles until cancelled.
    struct ScriptedFeed {
        events: Vec<FeedEvent>,
    }

    impl ScriptedFeed {
        fn new(events: Vec<FeedEvent>) -> Self {
            Self { events }
        }
    }

    #[async_trait::async_trait]
    impl TickFeed for ScriptedFeed {
        async fn run(
            &self,
            _access_token: AccessToken,
            _instruments: Vec<crate::domain::catalog::InstrumentToken>,
            events: mpsc::Sender<FeedEvent>,
            cancel: CancellationToken,
        ) -> Result<(), FeedError> {
            for event in self.events.clone() {
                events.send(event).await.map_err(|_| FeedError::ChannelClosed)?;
            }
            cancel.cancelled().await;
            Ok(())
        }
    }

    fn controller(
        provider: MockSessionProvider,
        feed: MockTickFeed,
        store: MockTickStore,
        notifier: Arc<RecordingNotifier>,
        cutoff: DateTime<Utc>,
    ) -> (SessionController, Arc<SessionMonitor>) {
        controller_with_feed(provider, Arc::new(feed), store, notifier, cutoff)
    }

    fn controller_with_feed(
        provider: MockSessionProvider,
        feed: Arc<dyn TickFeed>,
        store: MockTickStore,
        notifier: Arc<RecordingNotifier>,
        cutoff: DateTime<Utc>,
    ) -> (SessionController, Arc<SessionMonitor>) {
        let monitor = Arc::new(SessionMonitor::new());
        let processor = BatchProcessor::new(
            catalog(),
            Arc::new(store),
            notifier.clone(),
            BatchRetryPolicy::none(),
        );
        let mut config = SessionConfig::new(cutoff);
        config.credential_retry_delay = Duration::ZERO;
        let controller = SessionController::new(
            Arc::new(provider),
            feed,
            processor,
            notifier,
            Arc::new(SystemClock),
            monitor.clone(),
            config,
        );
        (controller, monitor)
    }

    fn token_provider() -> MockSessionProvider {
        let mut provider = MockSessionProvider::new();
        provider
            .expect_latest_token()
            .returning(|| Ok(Some(AccessToken::new("token"))));
        provider
    }

    #[tokio::test]
    async fn past_cutoff_refuses_to_start() {
        let mut provider = MockSessionProvider::new();
        provider.expect_latest_token().never();
        let mut feed = MockTickFeed::new();
        feed.expect_run().never();
        let mut store = MockTickStore::new();
        store.expect_write_batch().never();
        let notifier = Arc::new(RecordingNotifier::default());

        let cutoff = Utc::now() - TimeDelta::minutes(5);
        let (controller, monitor) = controller(provider, feed, store, notifier, cutoff);
        let err = controller.run(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, SessionError::PastCutoff { .. }));
        assert_eq!(monitor.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn state_changes_reach_metrics() {
        let mut metrics = MockIngestMetrics::new();
        metrics
            .expect_session_state()
            .withf(|state| *state == SessionState::Failed)
            .times(1)
            .return_const(());
        let mut provider = MockSessionProvider::new();
        provider.expect_latest_token().never();
        let notifier = Arc::new(RecordingNotifier::default());

        let cutoff = Utc::now() - TimeDelta::minutes(1);
        let (controller, _) =
            controller(provider, MockTickFeed::new(), MockTickStore::new(), notifier, cutoff);
        let result = controller
            .with_metrics(Arc::new(metrics))
            .run(CancellationToken::new())
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_credential_is_fatal() {
        let mut provider = MockSessionProvider::new();
        provider.expect_latest_token().times(1).returning(|| Ok(None));
        let mut feed = MockTickFeed::new();
        feed.expect_run().never();
        let notifier = Arc::new(RecordingNotifier::default());

        let cutoff = Utc::now() + TimeDelta::minutes(5);
        let (controller, monitor) =
            controller(provider, feed, MockTickStore::new(), notifier.clone(), cutoff);
        let err = controller.run(CancellationToken::new()).await.unwrap_err();

        assert_eq!(err, SessionError::NoCredential);
        assert_eq!(monitor.state(), SessionState::Failed);
        assert_eq!(notifier.subjects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn credential_lookup_is_retried() {
        let mut provider = MockSessionProvider::new();
        provider
            .expect_latest_token()
            .times(3)
            .returning(|| Err(SessionError::CredentialLookup("timeout".to_string())));
        let notifier = Arc::new(RecordingNotifier::default());

        let cutoff = Utc::now() + TimeDelta::minutes(5);
        let (controller, _) =
            controller(provider, MockTickFeed::new(), MockTickStore::new(), notifier, cutoff);
        let err = controller.run(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, SessionError::CredentialLookup(_)));
    }

    #[tokio::test]
    async fn processes_batches_until_shutdown() {
        let feed = ScriptedFeed::new(vec![
            FeedEvent::Connecting { attempt: 1 },
            FeedEvent::Connected,
            FeedEvent::Subscribed { instruments: 1 },
            FeedEvent::Ticks(vec![tick()]),
            FeedEvent::Ticks(vec![tick(), tick()]),
        ]);
        let written = Arc::new(Mutex::new(0usize));
        let seen = written.clone();
        let mut store = MockTickStore::new();
        store.expect_write_batch().returning(move |rows| {
            *seen.lock().unwrap() += rows.len();
            Ok(rows.len())
        });
        let notifier = Arc::new(RecordingNotifier::default());

        let cutoff = Utc::now() + TimeDelta::milliseconds(300);
        let (controller, monitor) = controller_with_feed(
            token_provider(),
            Arc::new(feed),
            store,
            notifier.clone(),
            cutoff,
        );
        let report = controller.run(CancellationToken::new()).await.unwrap();

        assert_eq!(report.final_state, SessionState::Stopped);
        assert_eq!(report.batches, 2);
        assert_eq!(report.totals.written, 3);
        assert_eq!(*written.lock().unwrap(), 3);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["run_id"], report.run_id.to_string());
        assert_eq!(json["totals"]["written"], 3);
        assert_eq!(monitor.state(), SessionState::Stopped);
        assert_eq!(
            notifier.subjects.lock().unwrap().as_slice(),
            ["Tick ingestion session started"]
        );
    }

    #[tokio::test]
    async fn feed_giving_up_fails_session() {
        let mut feed = MockTickFeed::new();
        feed.expect_run()
            .times(1)
            .returning(|_, _, _, _| Err(FeedError::MaxReconnectAttemptsExceeded(5)));
        let notifier = Arc::new(RecordingNotifier::default());

        let cutoff = Utc::now() + TimeDelta::minutes(5);
        let (controller, monitor) =
            controller(token_provider(), feed, MockTickStore::new(), notifier.clone(), cutoff);
        let err = controller.run(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, SessionError::FeedTerminated(_)));
        assert_eq!(monitor.state(), SessionState::Failed);
        assert!(
            notifier
                .subjects
                .lock()
                .unwrap()
                .iter()
                .any(|s| s.contains("abnormally"))
        );
    }

    #[tokio::test]
    async fn external_shutdown_stops_session() {
        let feed = Arc::new(ScriptedFeed::new(vec![]));
        let notifier = Arc::new(RecordingNotifier::default());
        let cutoff = Utc::now() + TimeDelta::hours(1);
        let (controller, _) =
            controller_with_feed(token_provider(), feed, MockTickStore::new(), notifier, cutoff);

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
            trigger.cancel();
        });

        let report = controller.run(shutdown).await.unwrap();
        assert_eq!(report.final_state, SessionState::Stopped);
        assert_eq!(report.batches, 0);
    }
}

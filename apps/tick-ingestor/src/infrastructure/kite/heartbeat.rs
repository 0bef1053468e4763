//! Feed Watchdog
//!
//! The ticker server sends a one-byte heartbeat frame roughly every
//! second when no market data is flowing. Any inbound frame (data,
//! heartbeat, text, pong) proves the connection is alive; silence longer
//! than the timeout means the socket is dead even if TCP has not noticed,
//! and the client reconnects.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Watchdog timing.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Period between silence checks; each healthy check also asks for a ping.
    pub check_interval: Duration,
    /// Silence after which the connection is considered dead.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(10),
        }
    }
}

/// What the socket loop should do after a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Connection looks alive; send a keepalive ping.
    SendPing,
    /// No frame within the timeout; drop and reconnect.
    Timeout,
}

impl HeartbeatEvent {
    /// Verdict for a given silence against a timeout.
    #[must_use]
    pub fn for_silence(silence: Duration, timeout: Duration) -> Self {
        if silence > timeout {
            Self::Timeout
        } else {
            Self::SendPing
        }
    }
}

/// Instant of the most recent inbound frame, shared with the socket reader.
#[derive(Debug)]
pub struct HeartbeatState {
    last_frame: RwLock<Instant>,
}

impl HeartbeatState {
    /// Start counting silence from now.
    #[must_use]
    pub fn new() -> Self {
        Self::since(Instant::now())
    }

    fn since(last_frame: Instant) -> Self {
        Self {
            last_frame: RwLock::new(last_frame),
        }
    }

    /// Note that a frame just arrived.
    pub fn record_frame(&self) {
        *self.last_frame.write() = Instant::now();
    }

    /// Time since the last frame.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_frame.read().elapsed()
    }
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic task comparing ticker silence to the timeout.
///
/// Stops after reporting [`HeartbeatEvent::Timeout`], when cancelled, or
/// when the socket loop drops its receiver.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a watchdog over `state`.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled or a timeout is reported.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let silence = self.state.silence();
            let event = HeartbeatEvent::for_silence(silence, self.config.timeout);
            if event == HeartbeatEvent::Timeout {
                tracing::warn!(
                    silence_ms = u64::try_from(silence.as_millis()).unwrap_or(u64::MAX),
                    timeout_ms = u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX),
                    "Ticker silent past heartbeat timeout"
                );
            }

            let delivered = self.event_tx.send(event).await.is_ok();
            if !delivered || event == HeartbeatEvent::Timeout {
                break;
            }
        }
        tracing::debug!("Feed watchdog stopped");
    }
}

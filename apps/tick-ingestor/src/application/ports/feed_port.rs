//! Tick Feed Port (Driven Port)
//!
//! Interface for the streaming connection. The feed owns transport-level
//! reconnection and must re-issue the full subscription every time it
//! connects; the session controller only consumes the events.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::AccessToken;
use crate::domain::catalog::InstrumentToken;
use crate::domain::tick::RawTick;

/// Event emitted by a running feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Opening a connection (attempt 1 is the initial connect).
    Connecting {
        /// Attempt number since the last successful connection.
        attempt: u32,
    },
    /// Transport connected.
    Connected,
    /// Subscription for the instrument set issued.
    Subscribed {
        /// Number of instruments subscribed.
        instruments: usize,
    },
    /// A batch of ticks, in arrival order.
    Ticks(Vec<RawTick>),
    /// Transport dropped; the feed will reconnect.
    Disconnected {
        /// Reason for the drop.
        reason: String,
    },
    /// Non-fatal error reported by the server or the codec.
    Error(String),
}

/// Feed failure that ends the feed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// Connection could not be established.
    #[error("feed connection failed: {0}")]
    Connection(String),
    /// The server refused the credential.
    #[error("feed authentication failed: {0}")]
    Authentication(String),
    /// Reconnect attempts exhausted.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
    /// Event receiver dropped.
    #[error("feed event channel closed")]
    ChannelClosed,
}

/// Streaming tick source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TickFeed: Send + Sync {
    /// Run until `cancel` fires or the feed gives up.
    ///
    /// Must subscribe `instruments` in full mode on every connection and
    /// deliver ticks through `events` in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError`] when the feed cannot continue.
    async fn run(
        &self,
        access_token: AccessToken,
        instruments: Vec<InstrumentToken>,
        events: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> Result<(), FeedError>;
}

//! Kite Ticker WebSocket Client
//!
//! Maintains the streaming connection for one session and implements the
//! [`TickFeed`] port.
//!
//! # Stream URL
//!
//! `wss://ws.kite.trade?api_key=<key>&access_token=<token>`
//!
//! # Lifecycle
//!
//! 1. Connect (the credential is part of the URL; a 403 on the handshake
//!    means the token was refused and is not retried).
//! 2. Subscribe the whole instrument set with one `subscribe` and one
//!    `mode` request. Subscriptions do not survive a reconnect, so this
//!    happens on every connection.
//! 3. Decode binary frames into tick batches; one frame is one batch.
//! 4. On transport failure or watchdog timeout, back off and reconnect.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::FixedOffset;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, KiteCodec};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::messages::{ControlRequest, TextMessage};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{AccessToken, FeedError, FeedEvent, TickFeed};
use crate::domain::catalog::InstrumentToken;
use crate::domain::tick::TickMode;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors ending one connection.
#[derive(Debug, thiserror::Error)]
pub enum KiteClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Frame could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Handshake refused the credential.
    #[error("authentication refused: {0}")]
    Authentication(String),

    /// No frame within the watchdog timeout.
    #[error("no frame within heartbeat timeout")]
    HeartbeatTimeout,

    /// Server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Event receiver dropped.
    #[error("event channel closed")]
    ChannelClosed,
}

// =============================================================================
// Configuration
// =============================================================================

/// Broker API key. Redacted in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Raw key.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// Configuration for the ticker client.
#[derive(Debug, Clone)]
pub struct KiteClientConfig {
    /// WebSocket endpoint without query string.
    pub url: String,
    /// Broker API key.
    pub api_key: ApiKey,
    /// Exchange offset used for packet timestamps.
    pub exchange_offset: FixedOffset,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Watchdog configuration.
    pub heartbeat: HeartbeatConfig,
}

impl KiteClientConfig {
    /// Create a configuration with default backoff and watchdog.
    #[must_use]
    pub fn new(url: impl Into<String>, api_key: ApiKey, exchange_offset: FixedOffset) -> Self {
        Self {
            url: url.into(),
            api_key,
            exchange_offset,
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }

    /// Full connection URL including credentials.
    #[must_use]
    pub fn connect_url(&self, access_token: &AccessToken) -> String {
        format!(
            "{}?api_key={}&access_token={}",
            self.url.trim_end_matches('/'),
            self.api_key.expose(),
            access_token.expose()
        )
    }
}

// =============================================================================
// Client
// =============================================================================

/// Kite ticker client.
pub struct KiteTickerClient {
    config: KiteClientConfig,
    codec: KiteCodec,
}

/// Per-run context shared by the connection attempts.
struct Session<'a> {
    access_token: &'a AccessToken,
    instruments: &'a [InstrumentToken],
    events: &'a mpsc::Sender<FeedEvent>,
    cancel: &'a CancellationToken,
}

impl KiteTickerClient {
    /// Create a new client.
    #[must_use]
    pub const fn new(config: KiteClientConfig) -> Self {
        let codec = KiteCodec::new(config.exchange_offset);
        Self { config, codec }
    }

    /// Connect and run until error or cancellation.
    async fn connect_and_run(
        &self,
        session: &Session<'_>,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), KiteClientError> {
        tracing::info!(url = %self.config.url, "Connecting to Kite ticker");

        let url = self.config.connect_url(session.access_token);
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(classify_handshake_error)?;
        let (mut write, mut read) = ws_stream.split();

        policy.reset();
        let _ = session.events.send(FeedEvent::Connected).await;

        self.subscribe(&mut write, session.instruments).await?;
        let _ = session
            .events
            .send(FeedEvent::Subscribed {
                instruments: session.instruments.len(),
            })
            .await;

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(10);
        let heartbeat_cancel = session.cancel.child_token();
        let _heartbeat_handle = tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat.clone(),
                heartbeat_state.clone(),
                heartbeat_tx,
                heartbeat_cancel.clone(),
            )
            .run(),
        );
        let _guard = heartbeat_cancel.drop_guard();

        loop {
            tokio::select! {
                () = session.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                heartbeat_event = heartbeat_rx.recv() => match heartbeat_event {
                    Some(HeartbeatEvent::SendPing) => {
                        write.send(Message::Ping(Vec::new().into())).await?;
                    }
                    Some(HeartbeatEvent::Timeout) => return Err(KiteClientError::HeartbeatTimeout),
                    None => tracing::debug!("Watchdog channel closed"),
                },
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            heartbeat_state.record_frame();
                            self.handle_binary(&data, session.events).await?;
                        }
                        Some(Ok(Message::Text(text))) => {
                            heartbeat_state.record_frame();
                            self.handle_text(&text, session.events).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat_state.record_frame();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_) | Message::Frame(_))) => {
                            heartbeat_state.record_frame();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Server sent close frame");
                            return Err(KiteClientError::ConnectionClosed);
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(KiteClientError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    async fn subscribe<W>(
        &self,
        write: &mut W,
        instruments: &[InstrumentToken],
    ) -> Result<(), KiteClientError>
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        if instruments.is_empty() {
            tracing::warn!("Instrument set is empty, nothing to subscribe");
            return Ok(());
        }
        for request in [
            ControlRequest::Subscribe(instruments.to_vec()),
            ControlRequest::Mode(TickMode::Full, instruments.to_vec()),
        ] {
            let json = request
                .to_json()
                .map_err(|e| KiteClientError::Codec(CodecError::Json(e)))?;
            write.send(Message::Text(json.into())).await?;
        }
        tracing::info!(instruments = instruments.len(), mode = "full", "Subscribed");
        Ok(())
    }

    async fn handle_binary(
        &self,
        data: &[u8],
        events: &mpsc::Sender<FeedEvent>,
    ) -> Result<(), KiteClientError> {
        if KiteCodec::is_heartbeat(data) {
            return Ok(());
        }
        let ticks = match self.codec.decode_binary(data) {
            Ok(ticks) => ticks,
            Err(e) => {
                tracing::warn!(error = %e, bytes = data.len(), "Dropping undecodable frame");
                metrics::record_feed_error("codec");
                return Ok(());
            }
        };
        if ticks.is_empty() {
            return Ok(());
        }
        events
            .send(FeedEvent::Ticks(ticks))
            .await
            .map_err(|_| KiteClientError::ChannelClosed)
    }

    async fn handle_text(&self, text: &str, events: &mpsc::Sender<FeedEvent>) {
        match self.codec.decode_text(text) {
            Ok(TextMessage::Error(message)) => {
                tracing::error!(message = %message, "Ticker error");
                let _ = events.send(FeedEvent::Error(message)).await;
            }
            Ok(TextMessage::Message(message)) => {
                tracing::info!(message = %message, "Ticker message");
            }
            Ok(TextMessage::Order(_)) => tracing::debug!("Ignoring order update"),
            Ok(TextMessage::Other(kind)) => tracing::debug!(kind = %kind, "Ignoring text message"),
            Err(e) => tracing::warn!(error = %e, "Undecodable text frame"),
        }
    }
}

#[async_trait]
impl TickFeed for KiteTickerClient {
    async fn run(
        &self,
        access_token: AccessToken,
        instruments: Vec<InstrumentToken>,
        events: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> Result<(), FeedError> {
        let session = Session {
            access_token: &access_token,
            instruments: &instruments,
            events: &events,
            cancel: &cancel,
        };
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                tracing::info!("Kite ticker client cancelled");
                return Ok(());
            }
            let _ = events.send(FeedEvent::Connecting { attempt }).await;

            let error = match self.connect_and_run(&session, &mut policy).await {
                Ok(()) => {
                    tracing::info!("Kite ticker connection closed");
                    return Ok(());
                }
                Err(KiteClientError::Authentication(message)) => {
                    return Err(FeedError::Authentication(message));
                }
                Err(KiteClientError::ChannelClosed) => return Err(FeedError::ChannelClosed),
                Err(e) => e,
            };

            tracing::warn!(error = %error, "Kite ticker connection error");
            metrics::record_feed_error(error_type(&error));
            if events
                .send(FeedEvent::Disconnected {
                    reason: error.to_string(),
                })
                .await
                .is_err()
            {
                return Err(FeedError::ChannelClosed);
            }

            let Some(delay) = policy.next_delay() else {
                return Err(FeedError::MaxReconnectAttemptsExceeded(policy.max_attempts()));
            };
            attempt = policy.attempt_count() + 1;
            tracing::info!(attempt, delay_ms = delay.as_millis(), "Reconnecting to Kite ticker");

            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Kite ticker client cancelled during reconnect delay");
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn classify_handshake_error(error: tungstenite::Error) -> KiteClientError {
    if let tungstenite::Error::Http(response) = &error {
        let status = response.status();
        if status == tungstenite::http::StatusCode::FORBIDDEN
            || status == tungstenite::http::StatusCode::UNAUTHORIZED
        {
            return KiteClientError::Authentication(format!("handshake returned {status}"));
        }
    }
    KiteClientError::WebSocket(error)
}

const fn error_type(error: &KiteClientError) -> &'static str {
    match error {
        KiteClientError::WebSocket(_) => "websocket",
        KiteClientError::Codec(_) => "codec",
        KiteClientError::Authentication(_) => "authentication",
        KiteClientError::HeartbeatTimeout => "heartbeat_timeout",
        KiteClientError::ConnectionClosed => "connection_closed",
        KiteClientError::ChannelClosed => "channel_closed",
    }
}

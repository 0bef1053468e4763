//! Kite Ticker Adapter
//!
//! Streaming market data from the Kite ticker WebSocket:
//!
//! - `codec`: binary tick frames and JSON text frames
//! - `messages`: subscribe/mode requests and server text messages
//! - `client`: connection lifecycle, implements the `TickFeed` port
//! - `heartbeat`: silence watchdog
//! - `reconnect`: backoff between connection attempts

pub mod client;
pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;

pub use client::{ApiKey, KiteClientConfig, KiteClientError, KiteTickerClient};
pub use codec::{CodecError, KiteCodec};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use messages::{ControlRequest, TextMessage};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};

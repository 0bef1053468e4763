//! Kite Ticker Control Messages
//!
//! JSON messages exchanged over the text side of the ticker socket.
//!
//! Client to server:
//!
//! ```json
//! {"a": "subscribe", "v": [408065, 256265]}
//! {"a": "mode", "v": ["full", [408065, 256265]]}
//! ```
//!
//! Server to client:
//!
//! ```json
//! {"type": "error", "data": "Invalid access token"}
//! {"type": "message", "data": "..."}
//! {"type": "order", "data": {...}}
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::catalog::InstrumentToken;
use crate::domain::tick::TickMode;

/// Request sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "a", content = "v", rename_all = "lowercase")]
pub enum ControlRequest {
    /// Subscribe to instruments (default mode is quote).
    Subscribe(Vec<InstrumentToken>),
    /// Unsubscribe from instruments.
    Unsubscribe(Vec<InstrumentToken>),
    /// Set the streaming mode for instruments.
    Mode(TickMode, Vec<InstrumentToken>),
}

impl ControlRequest {
    /// Serialize to the wire form.
    ///
    /// # Errors
    ///
    /// Returns a JSON error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Message received from the server in a text frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawTextMessage")]
pub enum TextMessage {
    /// Server-side error (bad token, bad subscription).
    Error(String),
    /// Informational message.
    Message(String),
    /// Order postback; not ingested.
    Order(serde_json::Value),
    /// Any other message type.
    Other(String),
}

#[derive(Deserialize)]
struct RawTextMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl From<RawTextMessage> for TextMessage {
    fn from(raw: RawTextMessage) -> Self {
        let text = |data: serde_json::Value| match data {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        match raw.kind.as_str() {
            "error" => Self::Error(text(raw.data)),
            "message" => Self::Message(text(raw.data)),
            "order" => Self::Order(raw.data),
            _ => Self::Other(raw.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> Vec<InstrumentToken> {
        vec![InstrumentToken::new(408_065), InstrumentToken::new(256_265)]
    }

    #[test]
    fn subscribe_wire_format() {
        let json = ControlRequest::Subscribe(tokens()).to_json().unwrap();
        assert_eq!(json, r#"{"a":"subscribe","v":[408065,256265]}"#);
    }

    #[test]
    fn mode_wire_format() {
        let json = ControlRequest::Mode(TickMode::Full, tokens()).to_json().unwrap();
        assert_eq!(json, r#"{"a":"mode","v":["full",[408065,256265]]}"#);
    }

    #[test]
    fn server_messages_parse() {
        let error: TextMessage =
            serde_json::from_str(r#"{"type":"error","data":"Invalid access token"}"#).unwrap();
        assert_eq!(error, TextMessage::Error("Invalid access token".to_string()));

        let order: TextMessage =
            serde_json::from_str(r#"{"type":"order","data":{"order_id":"1"}}"#).unwrap();
        assert!(matches!(order, TextMessage::Order(_)));

        let other: TextMessage =
            serde_json::from_str(r#"{"type":"instruments_meta","data":{}}"#).unwrap();
        assert_eq!(other, TextMessage::Other("instruments_meta".to_string()));
    }
}

//! Kite Ticker Codec
//!
//! Decodes the binary market data frames and the JSON text frames of the
//! Kite ticker WebSocket.
//!
//! # Binary Frame Format
//!
//! All integers are big-endian and unsigned.
//!
//! ```text
//! | u16 packet count | u16 len | packet (len bytes) | u16 len | packet | ...
//! ```
//!
//! A frame of a single byte is a heartbeat and carries no packets.
//!
//! | len | shape                                            |
//! |-----|--------------------------------------------------|
//! | 8   | LTP: token, last price                           |
//! | 28  | index quote: + high, low, open, close, change    |
//! | 32  | index full: + exchange timestamp                 |
//! | 44  | quote: + quantities, volume, OHLC                |
//! | 184 | full: + last trade time, OI, timestamp, depth    |
//!
//! Prices are integers in paise (or a finer unit for currency segments)
//! and are turned into exact decimals by setting the scale, never by
//! floating point division.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use rust_decimal::Decimal;

use crate::domain::catalog::InstrumentToken;
use crate::domain::tick::{
    DEPTH_LEVELS, DepthLevel, MarketDepth, Ohlc, OpenInterest, RawTick, TickDetail, TickMode,
    TradableDetail,
};
use crate::infrastructure::kite::messages::TextMessage;

/// Exchange segment of NSE currency derivatives.
const SEGMENT_CDS: u8 = 3;
/// Exchange segment of BSE currency derivatives.
const SEGMENT_BCD: u8 = 6;
/// Exchange segment of indices (not tradable).
const SEGMENT_INDICES: u8 = 9;

const LTP_PACKET: usize = 8;
const INDEX_QUOTE_PACKET: usize = 28;
const INDEX_FULL_PACKET: usize = 32;
const QUOTE_PACKET: usize = 44;
const FULL_PACKET: usize = 184;

const DEPTH_OFFSET: usize = 64;
const DEPTH_ENTRY: usize = 12;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame ended before a declared packet or field.
    #[error("truncated frame: need {needed} bytes at offset {offset}, have {available}")]
    Truncated {
        /// Offset of the read.
        offset: usize,
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },
}

/// Decoder for Kite ticker frames.
#[derive(Debug, Clone, Copy)]
pub struct KiteCodec {
    exchange_offset: FixedOffset,
}

impl KiteCodec {
    /// Create a codec converting epoch timestamps into `exchange_offset` local time.
    #[must_use]
    pub const fn new(exchange_offset: FixedOffset) -> Self {
        Self { exchange_offset }
    }

    /// Whether a binary frame is a heartbeat.
    #[must_use]
    pub const fn is_heartbeat(data: &[u8]) -> bool {
        data.len() < 2
    }

    /// Decode a binary frame into ticks.
    ///
    /// Packets of unknown length are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Truncated`] if the frame is shorter than its
    /// header declares.
    pub fn decode_binary(&self, data: &[u8]) -> Result<Vec<RawTick>, CodecError> {
        if Self::is_heartbeat(data) {
            return Ok(Vec::new());
        }

        let count = usize::from(read_u16(data, 0)?);
        let mut ticks = Vec::with_capacity(count);
        let mut offset = 2;

        for _ in 0..count {
            let len = usize::from(read_u16(data, offset)?);
            let packet = slice(data, offset + 2, len)?;
            offset += 2 + len;

            match self.decode_packet(packet)? {
                Some(tick) => ticks.push(tick),
                None => tracing::warn!(len, "Skipping packet of unknown length"),
            }
        }

        Ok(ticks)
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if the frame is not valid JSON.
    pub fn decode_text(&self, text: &str) -> Result<TextMessage, CodecError> {
        Ok(serde_json::from_str(text)?)
    }

    fn decode_packet(&self, packet: &[u8]) -> Result<Option<RawTick>, CodecError> {
        let token = InstrumentToken::new(read_u32(packet, 0)?);
        let segment = token.segment();
        let scale = price_scale(segment);
        let tradable = segment != SEGMENT_INDICES;
        let price_at = |at: usize| read_u32(packet, at).map(|v| Decimal::new(i64::from(v), scale));

        let tick = match packet.len() {
            LTP_PACKET => RawTick {
                instrument_token: token,
                mode: TickMode::Ltp,
                last_price: Some(price_at(4)?),
                exchange_timestamp: None,
                change: None,
                ohlc: None,
                detail: if tradable {
                    TickDetail::Tradable(Box::default())
                } else {
                    TickDetail::Index
                },
            },
            INDEX_QUOTE_PACKET | INDEX_FULL_PACKET => {
                let last_price = price_at(4)?;
                let ohlc = Ohlc {
                    high: price_at(8)?,
                    low: price_at(12)?,
                    open: price_at(16)?,
                    close: price_at(20)?,
                };
                let full = packet.len() == INDEX_FULL_PACKET;
                RawTick {
                    instrument_token: token,
                    mode: if full { TickMode::Full } else { TickMode::Quote },
                    last_price: Some(last_price),
                    exchange_timestamp: if full {
                        self.timestamp_at(packet, 28)?
                    } else {
                        None
                    },
                    change: percent_change(last_price, ohlc.close),
                    ohlc: Some(ohlc),
                    detail: TickDetail::Index,
                }
            }
            QUOTE_PACKET | FULL_PACKET => {
                let last_price = price_at(4)?;
                let ohlc = Ohlc {
                    open: price_at(28)?,
                    high: price_at(32)?,
                    low: price_at(36)?,
                    close: price_at(40)?,
                };
                let full = packet.len() == FULL_PACKET;
                let mut detail = TradableDetail {
                    last_traded_quantity: Some(read_i64(packet, 8)?),
                    average_traded_price: Some(price_at(12)?),
                    volume_traded: Some(read_i64(packet, 16)?),
                    total_buy_quantity: Some(read_i64(packet, 20)?),
                    total_sell_quantity: Some(read_i64(packet, 24)?),
                    ..TradableDetail::default()
                };
                let mut exchange_timestamp = None;
                if full {
                    detail.last_trade_time = self.timestamp_at(packet, 44)?;
                    detail.open_interest = Some(OpenInterest {
                        oi: read_i64(packet, 48)?,
                        oi_day_high: read_i64(packet, 52)?,
                        oi_day_low: read_i64(packet, 56)?,
                    });
                    exchange_timestamp = self.timestamp_at(packet, 60)?;
                    detail.depth = Some(decode_depth(packet, scale)?);
                }
                RawTick {
                    instrument_token: token,
                    mode: if full { TickMode::Full } else { TickMode::Quote },
                    last_price: Some(last_price),
                    exchange_timestamp,
                    change: percent_change(last_price, ohlc.close),
                    ohlc: Some(ohlc),
                    detail: TickDetail::Tradable(Box::new(detail)),
                }
            }
            _ => return Ok(None),
        };

        Ok(Some(tick))
    }

    /// Epoch seconds at `at` as exchange-local time; zero means absent.
    fn timestamp_at(&self, packet: &[u8], at: usize) -> Result<Option<NaiveDateTime>, CodecError> {
        let secs = read_u32(packet, at)?;
        if secs == 0 {
            return Ok(None);
        }
        Ok(DateTime::from_timestamp(i64::from(secs), 0)
            .map(|utc| utc.with_timezone(&self.exchange_offset).naive_local()))
    }
}

/// Decimal places of the integer prices in a segment.
const fn price_scale(segment: u8) -> u32 {
    match segment {
        SEGMENT_CDS => 7,
        SEGMENT_BCD => 4,
        _ => 2,
    }
}

fn percent_change(last: Decimal, close: Decimal) -> Option<Decimal> {
    if close.is_zero() {
        return None;
    }
    (last - close)
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|scaled| scaled.checked_div(close))
}

fn decode_depth(packet: &[u8], scale: u32) -> Result<MarketDepth, CodecError> {
    let mut depth = MarketDepth {
        buy: Vec::with_capacity(DEPTH_LEVELS),
        sell: Vec::with_capacity(DEPTH_LEVELS),
    };
    for index in 0..DEPTH_LEVELS * 2 {
        let at = DEPTH_OFFSET + index * DEPTH_ENTRY;
        let level = DepthLevel {
            quantity: read_i64(packet, at)?,
            price: Decimal::new(i64::from(read_u32(packet, at + 4)?), scale),
            orders: i64::from(read_u16(packet, at + 8)?),
        };
        if index < DEPTH_LEVELS {
            depth.buy.push(level);
        } else {
            depth.sell.push(level);
        }
    }
    Ok(depth)
}

// =============================================================================
// Byte Readers
// =============================================================================

fn slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], CodecError> {
    data.get(offset..offset + len)
        .ok_or(CodecError::Truncated {
            offset,
            needed: len,
            available: data.len().saturating_sub(offset),
        })
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16, CodecError> {
    let bytes = slice(data, offset, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, CodecError> {
    let bytes = slice(data, offset, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_i64(data: &[u8], offset: usize) -> Result<i64, CodecError> {
    read_u32(data, offset).map(i64::from)
}

//! Raw Tick Types
//!
//! The shapes a tick can take when it arrives from the feed. Index
//! instruments carry only price, timestamp and (in quote/full mode) OHLC;
//! tradable instruments additionally carry traded quantities, open
//! interest and a five-level order book. The shape is modelled as a
//! tagged union so consumers match on it instead of probing for fields.
//!
//! Field names follow the feed's own vocabulary; the mapping to the
//! persisted column names lives in [`crate::domain::row`].

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::catalog::InstrumentToken;

/// Number of order book levels per side.
pub const DEPTH_LEVELS: usize = 5;

// =============================================================================
// Mode
// =============================================================================

/// Subscription mode a packet was produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickMode {
    /// Last traded price only.
    Ltp,
    /// Price, quantities and OHLC.
    Quote,
    /// Everything, including depth.
    Full,
}

impl TickMode {
    /// Wire name used in subscription messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ltp => "ltp",
            Self::Quote => "quote",
            Self::Full => "full",
        }
    }
}

// =============================================================================
// Sub-records
// =============================================================================

/// Open/high/low/close for the trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ohlc {
    /// Day open.
    pub open: Decimal,
    /// Day high.
    pub high: Decimal,
    /// Day low.
    pub low: Decimal,
    /// Previous close.
    pub close: Decimal,
}

/// One order book level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    /// Quantity at this level.
    pub quantity: i64,
    /// Price at this level.
    pub price: Decimal,
    /// Number of orders at this level.
    pub orders: i64,
}

/// Order book snapshot, best level first on each side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketDepth {
    /// Bid side.
    pub buy: Vec<DepthLevel>,
    /// Ask side.
    pub sell: Vec<DepthLevel>,
}

/// Open interest for derivatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInterest {
    /// Current open interest.
    pub oi: i64,
    /// Day high of open interest.
    pub oi_day_high: i64,
    /// Day low of open interest.
    pub oi_day_low: i64,
}

/// Fields only tradable instruments carry.
///
/// Every field is optional because LTP-mode packets carry none of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradableDetail {
    /// Quantity of the last trade.
    pub last_traded_quantity: Option<i64>,
    /// Volume weighted average traded price.
    pub average_traded_price: Option<Decimal>,
    /// Cumulative volume for the day.
    pub volume_traded: Option<i64>,
    /// Pending buy quantity.
    pub total_buy_quantity: Option<i64>,
    /// Pending sell quantity.
    pub total_sell_quantity: Option<i64>,
    /// Time of the last trade.
    pub last_trade_time: Option<NaiveDateTime>,
    /// Open interest (derivatives, full mode).
    pub open_interest: Option<OpenInterest>,
    /// Order book (full mode).
    pub depth: Option<MarketDepth>,
}

/// Instrument-class dependent part of a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TickDetail {
    /// Index tick: no quantities, no depth.
    Index,
    /// Tradable instrument tick.
    Tradable(Box<TradableDetail>),
}

// =============================================================================
// Raw Tick
// =============================================================================

/// One tick as delivered by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTick {
    /// Instrument the tick belongs to.
    pub instrument_token: InstrumentToken,
    /// Mode the packet was produced in.
    pub mode: TickMode,
    /// Last traded price.
    pub last_price: Option<Decimal>,
    /// Exchange event time (exchange-local).
    pub exchange_timestamp: Option<NaiveDateTime>,
    /// Percent change against the previous close.
    pub change: Option<Decimal>,
    /// Day OHLC, absent in LTP mode.
    pub ohlc: Option<Ohlc>,
    /// Class-specific fields.
    pub detail: TickDetail,
}

impl RawTick {
    /// Minimal index tick.
    #[must_use]
    pub const fn index(
        instrument_token: InstrumentToken,
        last_price: Decimal,
        exchange_timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            instrument_token,
            mode: TickMode::Full,
            last_price: Some(last_price),
            exchange_timestamp: Some(exchange_timestamp),
            change: None,
            ohlc: None,
            detail: TickDetail::Index,
        }
    }

    /// Tradable tick with the given detail.
    #[must_use]
    pub fn tradable(
        instrument_token: InstrumentToken,
        last_price: Decimal,
        exchange_timestamp: NaiveDateTime,
        detail: TradableDetail,
    ) -> Self {
        Self {
            instrument_token,
            mode: TickMode::Full,
            last_price: Some(last_price),
            exchange_timestamp: Some(exchange_timestamp),
            change: None,
            ohlc: None,
            detail: TickDetail::Tradable(Box::new(detail)),
        }
    }

    /// Attach OHLC.
    #[must_use]
    pub fn with_ohlc(mut self, ohlc: Ohlc) -> Self {
        self.ohlc = Some(ohlc);
        self
    }

    /// Attach percent change.
    #[must_use]
    pub fn with_change(mut self, change: Decimal) -> Self {
        self.change = Some(change);
        self
    }

    /// Whether the instrument is tradable (not an index).
    #[must_use]
    pub const fn is_tradable(&self) -> bool {
        matches!(self.detail, TickDetail::Tradable(_))
    }

    /// Whether an OHLC sub-record is present.
    #[must_use]
    pub const fn has_ohlc(&self) -> bool {
        self.ohlc.is_some()
    }

    /// Whether a depth sub-record is present.
    #[must_use]
    pub fn has_depth(&self) -> bool {
        self.depth().is_some()
    }

    /// Tradable detail, if any.
    #[must_use]
    pub fn tradable_detail(&self) -> Option<&TradableDetail> {
        match &self.detail {
            TickDetail::Index => None,
            TickDetail::Tradable(detail) => Some(detail),
        }
    }

    /// Order book, if any.
    #[must_use]
    pub fn depth(&self) -> Option<&MarketDepth> {
        self.tradable_detail().and_then(|d| d.depth.as_ref())
    }
}

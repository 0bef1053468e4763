//! Tick Normalizer
//!
//! Pure transformation from one [`RawTick`] to one [`CanonicalRow`].
//!
//! - Destination metadata (symbol, table, database) comes from the
//!   [`Catalog`]; an unmapped token is an `UnknownInstrument` error.
//! - OHLC is flattened into four columns; absent OHLC leaves them null.
//! - Depth is flattened into 30 columns (5 levels per side, quantity,
//!   price, orders); absent depth sets all 30 explicitly to null.
//! - Prices are carried as the feed's exact decimals, never rounded.
//!
//! Errors are returned as values so the caller can drop the row and keep
//! processing the rest of the batch.

use std::fmt;

use crate::domain::catalog::{Catalog, InstrumentToken};
use crate::domain::row::{CanonicalRow, DepthColumns};
use crate::domain::tick::{DEPTH_LEVELS, DepthLevel, RawTick};

// =============================================================================
// Errors
// =============================================================================

/// Category of a normalization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormalizationErrorKind {
    /// Token absent from the catalog.
    UnknownInstrument,
    /// Required field missing from the tick.
    MalformedTick,
}

impl NormalizationErrorKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownInstrument => "unknown_instrument",
            Self::MalformedTick => "malformed_tick",
        }
    }
}

impl fmt::Display for NormalizationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-tick normalization failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizationError {
    /// Token absent from the catalog.
    #[error("unknown instrument {token}")]
    UnknownInstrument {
        /// Offending token.
        token: InstrumentToken,
    },
    /// Required field missing.
    #[error("malformed tick for instrument {token}: missing {field}")]
    MalformedTick {
        /// Offending token.
        token: InstrumentToken,
        /// Name of the missing feed field.
        field: &'static str,
    },
}

impl NormalizationError {
    /// Category of this error.
    #[must_use]
    pub const fn kind(&self) -> NormalizationErrorKind {
        match self {
            Self::UnknownInstrument { .. } => NormalizationErrorKind::UnknownInstrument,
            Self::MalformedTick { .. } => NormalizationErrorKind::MalformedTick,
        }
    }

    /// Token of the tick that failed.
    #[must_use]
    pub const fn token(&self) -> InstrumentToken {
        match self {
            Self::UnknownInstrument { token } | Self::MalformedTick { token, .. } => *token,
        }
    }
}

// =============================================================================
// Normalize
// =============================================================================

/// Normalize one raw tick against the catalog.
///
/// # Errors
///
/// - [`NormalizationError::UnknownInstrument`] if the token is not mapped.
/// - [`NormalizationError::MalformedTick`] if price or timestamp is missing.
pub fn normalize(tick: &RawTick, catalog: &Catalog) -> Result<CanonicalRow, NormalizationError> {
    let token = tick.instrument_token;
    let entry = catalog
        .resolve(token)
        .map_err(|_| NormalizationError::UnknownInstrument { token })?;

    let price = tick
        .last_price
        .ok_or(NormalizationError::MalformedTick {
            token,
            field: "last_price",
        })?;
    let timestamp = tick
        .exchange_timestamp
        .ok_or(NormalizationError::MalformedTick {
            token,
            field: "exchange_timestamp",
        })?;

    let detail = tick.tradable_detail();
    let open_interest = detail.and_then(|d| d.open_interest);
    let (buy_depth, sell_depth) = tick.depth().map_or_else(
        || ([DepthColumns::default(); DEPTH_LEVELS], [DepthColumns::default(); DEPTH_LEVELS]),
        |depth| (flatten_side(&depth.buy), flatten_side(&depth.sell)),
    );

    Ok(CanonicalRow {
        instrument_token: i64::from(token.value()),
        tradingsymbol: entry.symbol.clone(),
        tablename: entry.table_name.clone(),
        dbname: entry.db_name.clone(),
        timestamp,
        price,
        qty: detail.and_then(|d| d.last_traded_quantity),
        avg_price: detail.and_then(|d| d.average_traded_price),
        volume: detail.and_then(|d| d.volume_traded),
        b_qty: detail.and_then(|d| d.total_buy_quantity),
        s_qty: detail.and_then(|d| d.total_sell_quantity),
        open: tick.ohlc.map(|o| o.open),
        high: tick.ohlc.map(|o| o.high),
        low: tick.ohlc.map(|o| o.low),
        close: tick.ohlc.map(|o| o.close),
        changeper: tick.change,
        last_trade_time: detail.and_then(|d| d.last_trade_time),
        oi: open_interest.map(|oi| oi.oi),
        oi_high: open_interest.map(|oi| oi.oi_day_high),
        oi_low: open_interest.map(|oi| oi.oi_day_low),
        buy_depth,
        sell_depth,
    })
}

/// Flatten up to five levels; missing levels stay null, extra levels are ignored.
fn flatten_side(levels: &[DepthLevel]) -> [DepthColumns; DEPTH_LEVELS] {
    let mut out = [DepthColumns::default(); DEPTH_LEVELS];
    for (slot, level) in out.iter_mut().zip(levels) {
        *slot = DepthColumns {
            quantity: Some(level.quantity),
            price: Some(level.price),
            orders: Some(level.orders),
        };
    }
    out
}

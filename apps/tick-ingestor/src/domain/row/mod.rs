//! Canonical Row
//!
//! The fixed-width record persisted to the shared daily table. Every row
//! has the same shape regardless of instrument class: index ticks leave
//! quantity, open interest and depth columns null rather than omitting
//! them.
//!
//! Column names are the persisted names. The feed's field names map onto
//! them one to one through the struct fields; the serde renames on
//! [`CanonicalRow`] make a serialized row (as logged for a failed batch)
//! carry the persisted column names.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::tick::DEPTH_LEVELS;

// =============================================================================
// Column Layout
// =============================================================================

/// Columns forming the identity key.
pub const KEY_COLUMNS: [&str; 2] = ["instrument_token", "timestamp"];

/// All persisted columns, in insert order.
pub const COLUMNS: [&str; 50] = [
    "instrument_token",
    "tradingsymbol",
    "tablename",
    "dbname",
    "timestamp",
    "price",
    "qty",
    "avgPrice",
    "volume",
    "bQty",
    "sQty",
    "open",
    "high",
    "low",
    "close",
    "changeper",
    "lastTradeTime",
    "oi",
    "oiHigh",
    "oiLow",
    "bq0",
    "bp0",
    "bo0",
    "bq1",
    "bp1",
    "bo1",
    "bq2",
    "bp2",
    "bo2",
    "bq3",
    "bp3",
    "bo3",
    "bq4",
    "bp4",
    "bo4",
    "sq0",
    "sp0",
    "so0",
    "sq1",
    "sp1",
    "so1",
    "sq2",
    "sp2",
    "so2",
    "sq3",
    "sp3",
    "so3",
    "sq4",
    "sp4",
    "so4",
];

/// Columns overwritten on key conflict (everything except the key).
pub fn update_columns() -> impl Iterator<Item = &'static str> {
    COLUMNS
        .iter()
        .copied()
        .filter(|column| !KEY_COLUMNS.contains(column))
}

// =============================================================================
// Row
// =============================================================================

/// One depth level flattened into three nullable columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthColumns {
    /// Quantity (`bqN` / `sqN`).
    pub quantity: Option<i64>,
    /// Price (`bpN` / `spN`).
    pub price: Option<Decimal>,
    /// Order count (`boN` / `soN`).
    pub orders: Option<i64>,
}

/// Identity key of a persisted row.
pub type RowKey = (i64, NaiveDateTime);

/// The persisted unit: one tick, fixed shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRow {
    /// Instrument token.
    pub instrument_token: i64,
    /// Display symbol.
    pub tradingsymbol: String,
    /// Redistribution target table.
    pub tablename: String,
    /// Redistribution target database.
    pub dbname: String,
    /// Exchange event time.
    pub timestamp: NaiveDateTime,
    /// Last traded price.
    pub price: Decimal,
    /// Last traded quantity.
    pub qty: Option<i64>,
    /// Average traded price.
    #[serde(rename = "avgPrice")]
    pub avg_price: Option<Decimal>,
    /// Cumulative volume.
    pub volume: Option<i64>,
    /// Total pending buy quantity.
    #[serde(rename = "bQty")]
    pub b_qty: Option<i64>,
    /// Total pending sell quantity.
    #[serde(rename = "sQty")]
    pub s_qty: Option<i64>,
    /// Day open.
    pub open: Option<Decimal>,
    /// Day high.
    pub high: Option<Decimal>,
    /// Day low.
    pub low: Option<Decimal>,
    /// Previous close.
    pub close: Option<Decimal>,
    /// Percent change against close.
    pub changeper: Option<Decimal>,
    /// Time of last trade.
    #[serde(rename = "lastTradeTime")]
    pub last_trade_time: Option<NaiveDateTime>,
    /// Open interest.
    pub oi: Option<i64>,
    /// Open interest day high.
    #[serde(rename = "oiHigh")]
    pub oi_high: Option<i64>,
    /// Open interest day low.
    #[serde(rename = "oiLow")]
    pub oi_low: Option<i64>,
    /// Bid levels 0..5.
    pub buy_depth: [DepthColumns; DEPTH_LEVELS],
    /// Ask levels 0..5.
    pub sell_depth: [DepthColumns; DEPTH_LEVELS],
}

impl CanonicalRow {
    /// Identity key `(instrument_token, timestamp)`.
    #[must_use]
    pub const fn key(&self) -> RowKey {
        (self.instrument_token, self.timestamp)
    }

    /// Whether every depth column is null.
    #[must_use]
    pub fn depth_is_null(&self) -> bool {
        self.buy_depth
            .iter()
            .chain(self.sell_depth.iter())
            .all(|level| *level == DepthColumns::default())
    }
}

/// Collapse duplicate keys, keeping the last occurrence of each key at the
/// position of its first occurrence.
#[must_use]
pub fn dedupe_last_wins(rows: &[CanonicalRow]) -> Vec<CanonicalRow> {
    let mut position = std::collections::HashMap::with_capacity(rows.len());
    let mut out: Vec<CanonicalRow> = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(&index) = position.get(&row.key()) {
            out[index] = row.clone();
        } else {
            position.insert(row.key(), out.len());
            out.push(row.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::NaiveDate;

    use super::*;

    /// Feed field name to persisted column name. Fields not listed keep
    /// their name (`instrument_token`, `open`, `high`, `low`, `close`, `oi`).
    const FIELD_RENAMES: &[(&str, &str)] = &[
        ("exchange_timestamp", "timestamp"),
        ("last_price", "price"),
        ("last_traded_quantity", "qty"),
        ("average_traded_price", "avgPrice"),
        ("volume_traded", "volume"),
        ("total_buy_quantity", "bQty"),
        ("total_sell_quantity", "sQty"),
        ("last_trade_time", "lastTradeTime"),
        ("change", "changeper"),
        ("oi_day_high", "oiHigh"),
        ("oi_day_low", "oiLow"),
    ];

    fn row(token: i64, second: u32, price: i64) -> CanonicalRow {
        CanonicalRow {
            instrument_token: token,
            tradingsymbol: "INFY".to_string(),
            tablename: "infy".to_string(),
            dbname: "equity_db".to_string(),
            timestamp: NaiveDate::from_ymd_opt(2024, 3, 4)
                .unwrap()
                .and_hms_opt(9, 15, second)
                .unwrap(),
            price: Decimal::new(price, 2),
            qty: None,
            avg_price: None,
            volume: None,
            b_qty: None,
            s_qty: None,
            open: None,
            high: None,
            low: None,
            close: None,
            changeper: None,
            last_trade_time: None,
            oi: None,
            oi_high: None,
            oi_low: None,
            buy_depth: [DepthColumns::default(); DEPTH_LEVELS],
            sell_depth: [DepthColumns::default(); DEPTH_LEVELS],
        }
    }

    #[test]
    fn columns_are_unique_and_fifty() {
        let unique: HashSet<_> = COLUMNS.iter().collect();
        assert_eq!(unique.len(), 50);
        assert_eq!(update_columns().count(), 48);
    }

    #[test]
    fn every_rename_target_is_a_column() {
        for (_, to) in FIELD_RENAMES {
            assert!(COLUMNS.contains(to), "{to} missing from COLUMNS");
        }
    }

    #[test]
    fn serialized_row_uses_persisted_names() {
        let json = serde_json::to_value(row(1, 0, 100)).unwrap();
        let object = json.as_object().unwrap();
        for (from, to) in FIELD_RENAMES {
            assert!(object.contains_key(*to), "{to} not serialized");
            assert!(!object.contains_key(*from) || from == to);
        }
    }

    #[test]
    fn dedupe_keeps_last_value_per_key() {
        let rows = vec![row(1, 0, 100), row(2, 0, 200), row(1, 0, 150)];
        let deduped = dedupe_last_wins(&rows);

        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].price, Decimal::new(150, 2));
        assert_eq!(deduped[1].instrument_token, 2);
    }

    #[test]
    fn null_depth_detected() {
        let mut r = row(1, 0, 100);
        assert!(r.depth_is_null());
        r.sell_depth[4].orders = Some(3);
        assert!(!r.depth_is_null());
    }
}

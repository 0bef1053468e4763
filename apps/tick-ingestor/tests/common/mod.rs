//! Shared fixtures for the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tick_ingestor::{
    AccessToken, CanonicalRow, Catalog, CatalogEntry, Clock, DepthLevel, FeedError, FeedEvent,
    InMemoryTickStore, InstrumentToken, MarketDepth, Notifier, Ohlc, OpenInterest, RawTick,
    TickFeed, TickStore, TradableDetail, WriteError,
};

pub const RELIANCE: u32 = 738_561;
pub const NIFTY_50: u32 = 256_265;
pub const UNKNOWN: u32 = 999_999;

pub fn at(second: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 4)
        .unwrap()
        .and_hms_opt(9, 15, second)
        .unwrap()
}

pub fn catalog() -> Arc<Catalog> {
    Arc::new(
        Catalog::builder()
            .entry(
                InstrumentToken::new(RELIANCE),
                CatalogEntry::new("reliance", "equity_db", "RELIANCE", false),
            )
            .entry(
                InstrumentToken::new(NIFTY_50),
                CatalogEntry::new("nifty_50", "equity_db", "NIFTY 50", true),
            )
            .subscriptions([RELIANCE, NIFTY_50, UNKNOWN].map(InstrumentToken::new))
            .build(),
    )
}

pub fn index_tick(second: u32, price: i64) -> RawTick {
    RawTick::index(InstrumentToken::new(NIFTY_50), Decimal::new(price, 2), at(second))
}

pub fn equity_tick(second: u32, price: i64) -> RawTick {
    let level = |i: i64| DepthLevel {
        quantity: 100 * (i + 1),
        price: Decimal::new(price - i * 5, 2),
        orders: i + 1,
    };
    let depth = MarketDepth {
        buy: (0..5).map(level).collect(),
        sell: (0..5)
            .map(|i| DepthLevel {
                price: Decimal::new(price + (i + 1) * 5, 2),
                ..level(i)
            })
            .collect(),
    };
    let detail = TradableDetail {
        last_traded_quantity: Some(10),
        average_traded_price: Some(Decimal::new(294_875, 2)),
        volume_traded: Some(1_234_567),
        total_buy_quantity: Some(45_000),
        total_sell_quantity: Some(52_000),
        last_trade_time: Some(at(second)),
        open_interest: Some(OpenInterest {
            oi: 0,
            oi_day_high: 0,
            oi_day_low: 0,
        }),
        depth: Some(depth),
    };
    RawTick::tradable(
        InstrumentToken::new(RELIANCE),
        Decimal::new(price, 2),
        at(second),
        detail,
    )
    .with_ohlc(Ohlc {
        open: Decimal::new(293_000, 2),
        high: Decimal::new(296_000, 2),
        low: Decimal::new(292_500, 2),
        close: Decimal::new(292_000, 2),
    })
    .with_change(Decimal::new(10_445, 3))
}

pub fn unknown_tick(second: u32) -> RawTick {
    RawTick::index(InstrumentToken::new(UNKNOWN), Decimal::new(100, 2), at(second))
}

/// Notifier keeping every message.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn subjects(&self) -> Vec<String> {
        self.messages.lock().iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn bodies_for(&self, subject: &str) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(s, _)| s == subject)
            .map(|(_, b)| b.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, subject: &str, body: &str) {
        self.messages
            .lock()
            .push((subject.to_string(), body.to_string()));
    }
}

/// Clock frozen at one instant.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Clock reading `start` once, then `start + later` on every call after.
/// Stands in for time passing between session start and timer arming.
pub struct SteppingClock {
    start: DateTime<Utc>,
    later: chrono::TimeDelta,
    reads: AtomicU32,
}

impl SteppingClock {
    pub fn new(start: DateTime<Utc>, later: chrono::TimeDelta) -> Self {
        Self {
            start,
            later,
            reads: AtomicU32::new(0),
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
            self.start
        } else {
            self.start + self.later
        }
    }
}

/// In-memory store whose writes take `delay` before landing.
pub struct SlowStore {
    inner: Arc<InMemoryTickStore>,
    delay: Duration,
    started: AtomicU32,
}

impl SlowStore {
    pub fn new(inner: Arc<InMemoryTickStore>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            started: AtomicU32::new(0),
        }
    }

    pub fn writes_started(&self) -> u32 {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TickStore for SlowStore {
    async fn write_batch(&self, rows: &[CanonicalRow]) -> Result<usize, WriteError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.write_batch(rows).await
    }
}

/// Feed replaying scripted batches, then idling until cancelled.
pub struct ScriptedFeed {
    batches: Vec<Vec<RawTick>>,
    runs: Mutex<u32>,
}

impl ScriptedFeed {
    pub fn new(batches: Vec<Vec<RawTick>>) -> Self {
        Self {
            batches,
            runs: Mutex::new(0),
        }
    }

    pub fn runs(&self) -> u32 {
        *self.runs.lock()
    }
}

#[async_trait]
impl TickFeed for ScriptedFeed {
    async fn run(
        &self,
        _access_token: AccessToken,
        instruments: Vec<InstrumentToken>,
        events: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> Result<(), FeedError> {
        *self.runs.lock() += 1;

        emit(&events, FeedEvent::Connecting { attempt: 1 }).await?;
        emit(&events, FeedEvent::Connected).await?;
        emit(
            &events,
            FeedEvent::Subscribed {
                instruments: instruments.len(),
            },
        )
        .await?;
        for batch in &self.batches {
            emit(&events, FeedEvent::Ticks(batch.clone())).await?;
        }

        cancel.cancelled().await;
        Ok(())
    }
}

async fn emit(events: &mpsc::Sender<FeedEvent>, event: FeedEvent) -> Result<(), FeedError> {
    events.send(event).await.map_err(|_| FeedError::ChannelClosed)
}

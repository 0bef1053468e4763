#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::unreadable_literal
    )
)]

//! Tick Ingestor - Streaming Tick Persistence
//!
//! Keeps one Kite ticker session open for the trading day, normalizes
//! every tick into the canonical wide row and upserts each batch into
//! the shared daily table, keyed by `(instrument_token, timestamp)`.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and rules
//!   - `catalog`: Instrument token to destination mapping
//!   - `tick`: Raw tick shapes (index / tradable, optional OHLC and depth)
//!   - `row`: Canonical row and column layout
//!   - `normalizer`: Raw tick to canonical row
//!   - `session`: Session state machine
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Feed, store, credential, notifier and clock interfaces
//!   - `services`: Batch processing, session control, monitoring
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `kite`: WebSocket client and binary codec
//!   - `persistence`: PostgreSQL and in-memory stores, token providers
//!   - `catalog`: Lookup CSV loader
//!   - `notify`: Log and webhook notifiers
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Kite WS ──► KiteTickerClient ──► FeedEvent::Ticks ──► SessionController
//!                                                            │
//!                                   normalize ◄── BatchProcessor
//!                                                            │
//!                                           TickStore::write_batch (upsert)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pure types and rules with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::catalog::{Catalog, CatalogBuilder, CatalogEntry, InstrumentToken, NotFound};
pub use domain::normalizer::{NormalizationError, NormalizationErrorKind, normalize};
pub use domain::row::{CanonicalRow, DepthColumns};
pub use domain::session::{SessionState, SessionStateMachine};
pub use domain::tick::{
    DepthLevel, MarketDepth, Ohlc, OpenInterest, RawTick, TickDetail, TickMode, TradableDetail,
};

// Ports and services
pub use application::ports::{
    AccessToken, Clock, FeedError, FeedEvent, IngestMetrics, NoopMetrics, Notifier,
    SessionProvider, SystemClock, TickFeed, TickStore, WriteError,
};
pub use application::services::{
    BatchProcessor, BatchReport, BatchRetryPolicy, PreparedBatch, SessionConfig,
    SessionController, SessionError, SessionMonitor, SessionReport, SessionSnapshot,
};

// Infrastructure
pub use infrastructure::catalog::{CatalogError, load_catalog};
pub use infrastructure::config::{ConfigError, IngestorConfig};
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::kite::{KiteClientConfig, KiteTickerClient};
pub use infrastructure::metrics::{PrometheusMetrics, init_metrics};
pub use infrastructure::notify::{TracingNotifier, WebhookNotifier};
pub use infrastructure::persistence::{
    InMemoryTickStore, PostgresSessionProvider, PostgresTickStore, StaticSessionProvider,
};
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};

//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `TickFeed`: Streaming connection delivering tick batches
//! - `TickStore`: Idempotent batch upsert into the daily table
//! - `SessionProvider`: Current access credential
//! - `Notifier`: Fire-and-forget operator notification
//! - `Clock`: Wall-clock source for the shutdown cutoff
//! - `IngestMetrics`: Pipeline counters and gauges

mod clock_port;
mod feed_port;
mod metrics_port;
mod notify_port;
mod session_port;
mod store_port;

pub use clock_port::{Clock, SystemClock};
pub use feed_port::{FeedError, FeedEvent, TickFeed};
pub use metrics_port::{IngestMetrics, NoopMetrics};
pub use notify_port::Notifier;
pub use session_port::{AccessToken, SessionProvider};
pub use store_port::{TickStore, WriteError};

#[cfg(test)]
pub use feed_port::MockTickFeed;
#[cfg(test)]
pub use metrics_port::MockIngestMetrics;
#[cfg(test)]
pub use notify_port::MockNotifier;
#[cfg(test)]
pub use session_port::MockSessionProvider;
#[cfg(test)]
pub use store_port::MockTickStore;

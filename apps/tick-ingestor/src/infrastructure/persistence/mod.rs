//! Persistence Adapters
//!
//! Implementations of the [`TickStore`](crate::application::ports::TickStore)
//! and [`SessionProvider`](crate::application::ports::SessionProvider)
//! ports.

mod in_memory;
mod postgres;
mod session_provider;

pub use in_memory::InMemoryTickStore;
pub use postgres::{MAX_ROWS_PER_STATEMENT, PostgresTickStore};
pub use session_provider::{PostgresSessionProvider, StaticSessionProvider};

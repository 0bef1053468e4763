//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `BatchProcessor`: Normalizes a feed batch and upserts it
//! - `SessionController`: Owns the session lifecycle and scheduled shutdown
//! - `SessionMonitor`: Shared session status for health reporting

mod batch;
mod monitor;
mod session;

pub use batch::{BatchProcessor, BatchReport, BatchRetryPolicy, PreparedBatch};
pub use monitor::{SessionMonitor, SessionSnapshot};
pub use session::{SessionConfig, SessionController, SessionError, SessionReport};

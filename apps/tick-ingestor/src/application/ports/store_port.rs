//! Tick Store Port (Driven Port)
//!
//! Interface for persisting canonical rows into the shared daily table.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::row::CanonicalRow;

/// Batch write failure. The whole batch was rejected; nothing was committed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// Store unreachable or connection lost mid-write.
    #[error("store connection error: {message}")]
    Connection {
        /// Error details.
        message: String,
    },
    /// Statement failed.
    #[error("store query error: {message}")]
    Query {
        /// Error details.
        message: String,
    },
    /// Store refused the data (constraint or type violation).
    #[error("batch rejected: {message}")]
    Rejected {
        /// Error details.
        message: String,
    },
    /// Shutdown grace ran out before the write finished; rolled back.
    #[error("write abandoned at shutdown after {grace:?} grace")]
    Abandoned {
        /// Grace the write was given.
        grace: Duration,
    },
}

impl WriteError {
    /// Whether a retry of the same batch could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Query { .. })
    }

    /// Label used in metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Query { .. } => "query",
            Self::Rejected { .. } => "rejected",
            Self::Abandoned { .. } => "abandoned",
        }
    }
}

/// Idempotent batch upsert keyed by `(instrument_token, timestamp)`.
///
/// Implementations must be all-or-nothing per call and must overwrite
/// every non-key column of an existing row with the new values.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TickStore: Send + Sync {
    /// Upsert a batch, returning the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError`] if the batch could not be committed.
    async fn write_batch(&self, rows: &[CanonicalRow]) -> Result<usize, WriteError>;
}

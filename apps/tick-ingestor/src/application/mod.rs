//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the ingestion services and the port interfaces
//! that define how the domain interacts with the feed, the store, the
//! credential source and operators.

/// Port interfaces for external systems (feed, store, credentials, notifications).
pub mod ports;

/// Application services for batch processing and session control.
pub mod services;

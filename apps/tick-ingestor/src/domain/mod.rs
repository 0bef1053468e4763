//! Domain Layer - Core ingestion types and rules.
//!
//! This layer contains the tick ingestion domain with no I/O: the
//! instrument catalog, the raw tick shapes delivered by the feed, the
//! canonical wide row persisted to the daily table, the normalizer that
//! maps one to the other, and the session lifecycle state machine.

/// Instrument catalog (token to table/database/symbol mapping).
pub mod catalog;

/// Raw tick shapes produced by the feed.
pub mod tick;

/// Canonical wide row and the persisted column layout.
pub mod row;

/// Pure raw tick to canonical row transformation.
pub mod normalizer;

/// Stream session lifecycle state machine.
pub mod session;

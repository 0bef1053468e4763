//! Instrument Catalog
//!
//! Immutable mapping from the exchange-assigned instrument token to the
//! destination metadata written with every row: target table name,
//! target database label, display symbol, and whether the instrument is
//! an index.
//!
//! # Design
//!
//! The catalog is built once before a session starts and is shared
//! read-only (behind an `Arc`) for the whole session. It is never
//! mutated while ticks are being received; a new session builds a new
//! catalog.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Instrument Token
// =============================================================================

/// Exchange-assigned numeric instrument identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentToken(u32);

impl InstrumentToken {
    /// Wrap a raw token.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw token value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Exchange segment encoded in the low byte of the token.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn segment(self) -> u8 {
        (self.0 & 0xff) as u8
    }
}

impl From<u32> for InstrumentToken {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for InstrumentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Catalog Entry
// =============================================================================

/// Destination metadata for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Per-instrument table the row is redistributed into later in the day.
    pub table_name: String,
    /// Target database label for redistribution.
    pub db_name: String,
    /// Display symbol.
    pub symbol: String,
    /// Whether the instrument is an index (price-only ticks).
    pub is_index: bool,
}

impl CatalogEntry {
    /// Create a new entry.
    #[must_use]
    pub fn new(
        table_name: impl Into<String>,
        db_name: impl Into<String>,
        symbol: impl Into<String>,
        is_index: bool,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            db_name: db_name.into(),
            symbol: symbol.into(),
            is_index,
        }
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Lookup failure for an instrument token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("instrument {0} not found in catalog")]
pub struct NotFound(pub InstrumentToken);

/// Immutable instrument catalog plus the subscription set.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: HashMap<InstrumentToken, CatalogEntry>,
    subscriptions: Vec<InstrumentToken>,
}

impl Catalog {
    /// Start building a catalog.
    #[must_use]
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// Resolve an instrument token to its destination metadata.
    ///
    /// # Errors
    ///
    /// Returns [`NotFound`] if the token is not mapped.
    pub fn resolve(&self, token: InstrumentToken) -> Result<&CatalogEntry, NotFound> {
        self.entries.get(&token).ok_or(NotFound(token))
    }

    /// Check whether a token is mapped.
    #[must_use]
    pub fn contains(&self, token: InstrumentToken) -> bool {
        self.entries.contains_key(&token)
    }

    /// Full subscription set, in source order, without duplicates.
    #[must_use]
    pub fn subscriptions(&self) -> &[InstrumentToken] {
        &self.subscriptions
    }

    /// Subscribed tokens that have no mapping (their ticks will be dropped).
    #[must_use]
    pub fn unmapped_subscriptions(&self) -> Vec<InstrumentToken> {
        self.subscriptions
            .iter()
            .copied()
            .filter(|token| !self.entries.contains_key(token))
            .collect()
    }

    /// Number of mapped instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no instrument is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builder merging mapping sources in order.
///
/// Later inserts for the same token replace earlier ones.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    entries: HashMap<InstrumentToken, CatalogEntry>,
    subscriptions: Vec<InstrumentToken>,
    seen: HashSet<InstrumentToken>,
}

impl CatalogBuilder {
    /// Map a token, overriding any earlier mapping.
    #[must_use]
    pub fn entry(mut self, token: InstrumentToken, entry: CatalogEntry) -> Self {
        self.insert(token, entry);
        self
    }

    /// Map a token in place.
    pub fn insert(&mut self, token: InstrumentToken, entry: CatalogEntry) {
        self.entries.insert(token, entry);
    }

    /// Append tokens to the subscription set, skipping ones already present.
    pub fn subscribe(&mut self, tokens: impl IntoIterator<Item = InstrumentToken>) {
        for token in tokens {
            if self.seen.insert(token) {
                self.subscriptions.push(token);
            }
        }
    }

    /// Builder-style variant of [`Self::subscribe`].
    #[must_use]
    pub fn subscriptions(mut self, tokens: impl IntoIterator<Item = InstrumentToken>) -> Self {
        self.subscribe(tokens);
        self
    }

    /// Freeze into an immutable catalog.
    #[must_use]
    pub fn build(self) -> Catalog {
        Catalog {
            entries: self.entries,
            subscriptions: self.subscriptions,
        }
    }
}

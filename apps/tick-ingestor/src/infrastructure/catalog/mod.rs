//! Catalog Loader
//!
//! Builds the session [`Catalog`] from the CSV files in the lookup
//! directory maintained by the nightly lookup-table job.
//!
//! # Files
//!
//! | File | Columns |
//! |------|---------|
//! | `equity_universe_token_table.csv` | `instrument_token,TableName,tradingsymbol` |
//! | `nifty_options_token_table.csv` | `instrument_token,TableName` |
//! | `bank_nifty_options_token_table.csv` | `instrument_token,TableName` |
//! | `*_token_list.csv` (one per source) | `instrument_token` |
//! | `index_token_list.csv` | `instrument_token` |
//!
//! The `*_token_table.csv` files are the token to table (and symbol)
//! mappings; `TableName` is also accepted as `tablename`. Option symbols
//! and table names coincide, so option tables carry no symbol column.
//! `equity_universe_lookup.csv` (`Symbol,TableName`) is an input of the
//! lookup job and is not read here.
//!
//! Sources are applied equity, then index options, then bank index
//! options; a later source overrides an earlier one for the same token.
//! Tokens in `index_token_list.csv` are flagged as indexes.

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::catalog::{Catalog, CatalogBuilder, CatalogEntry, InstrumentToken};
use crate::infrastructure::config::CatalogSettings;

/// Catalog loading failure.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// File could not be opened.
    #[error("cannot open {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// File contents could not be parsed.
    #[error("cannot parse {path}: {source}")]
    Csv {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: csv::Error,
    },
}

/// One lookup source: mapping file, token list and database label.
#[derive(Debug, Clone)]
pub struct CatalogSource {
    /// Mapping file name.
    pub lookup_file: &'static str,
    /// Subscription list file name.
    pub token_list_file: &'static str,
    /// Value written to the `dbname` column.
    pub db_name: String,
}

/// Sources in application order.
#[must_use]
pub fn default_sources(settings: &CatalogSettings) -> Vec<CatalogSource> {
    vec![
        CatalogSource {
            lookup_file: "equity_universe_token_table.csv",
            token_list_file: "equity_universe_token_list.csv",
            db_name: settings.equity_db.clone(),
        },
        CatalogSource {
            lookup_file: "nifty_options_token_table.csv",
            token_list_file: "nifty_options_token_list.csv",
            db_name: settings.options_db.clone(),
        },
        CatalogSource {
            lookup_file: "bank_nifty_options_token_table.csv",
            token_list_file: "bank_nifty_options_token_list.csv",
            db_name: settings.banknifty_options_db.clone(),
        },
    ]
}

/// Tokens flagged as indexes across all sources.
pub const INDEX_TOKEN_FILE: &str = "index_token_list.csv";

#[derive(Debug, Deserialize)]
struct LookupRecord {
    instrument_token: u32,
    #[serde(rename = "TableName", alias = "tablename")]
    table_name: String,
    #[serde(default)]
    tradingsymbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenRecord {
    instrument_token: u32,
}

/// Load the catalog from `settings.lookup_dir`.
///
/// # Errors
///
/// Returns [`CatalogError`] if a file is missing or malformed.
pub fn load_catalog(settings: &CatalogSettings) -> Result<Catalog, CatalogError> {
    load_from(&settings.lookup_dir, &default_sources(settings))
}

/// Load the catalog from explicit sources.
///
/// # Errors
///
/// Returns [`CatalogError`] if a file is missing or malformed.
pub fn load_from(dir: &Path, sources: &[CatalogSource]) -> Result<Catalog, CatalogError> {
    let indexes: HashSet<u32> = read_records::<TokenRecord>(&dir.join(INDEX_TOKEN_FILE))?
        .into_iter()
        .map(|record| record.instrument_token)
        .collect();
    let mut builder = Catalog::builder();

    for source in sources {
        let mapped = apply_lookup(
            &mut builder,
            &dir.join(source.lookup_file),
            &source.db_name,
            &indexes,
        )?;
        let tokens = read_records::<TokenRecord>(&dir.join(source.token_list_file))?;
        info!(
            source = source.lookup_file,
            mapped,
            subscribed = tokens.len(),
            "Catalog source loaded"
        );
        builder.subscribe(
            tokens
                .into_iter()
                .map(|record| InstrumentToken::new(record.instrument_token)),
        );
    }

    let catalog = builder.build();
    let unmapped = catalog.unmapped_subscriptions();
    if !unmapped.is_empty() {
        warn!(
            count = unmapped.len(),
            tokens = ?unmapped,
            "Subscribed instruments missing from lookup tables; their ticks will be dropped"
        );
    }
    info!(
        instruments = catalog.len(),
        subscriptions = catalog.subscriptions().len(),
        "Catalog loaded"
    );
    Ok(catalog)
}

fn apply_lookup(
    builder: &mut CatalogBuilder,
    path: &Path,
    db_name: &str,
    indexes: &HashSet<u32>,
) -> Result<usize, CatalogError> {
    let records = read_records::<LookupRecord>(path)?;
    let count = records.len();
    for record in records {
        let symbol = record
            .tradingsymbol
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| record.table_name.clone());
        let is_index = indexes.contains(&record.instrument_token);
        builder.insert(
            InstrumentToken::new(record.instrument_token),
            CatalogEntry::new(record.table_name, db_name, symbol, is_index),
        );
    }
    Ok(count)
}

fn read_records<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, CatalogError> {
    let file = File::open(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file)
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|source| CatalogError::Csv {
            path: path.to_path_buf(),
            source,
        })
}

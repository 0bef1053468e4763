//! Configuration Module
//!
//! Configuration loading for the ingestor service.

mod settings;

pub use settings::{
    CatalogSettings, ConfigError, DEFAULT_WS_URL, DatabaseSettings, FeedSettings, IngestorConfig,
    ServerSettings, SessionSettings,
};

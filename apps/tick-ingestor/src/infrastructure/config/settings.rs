//! Ingestor Configuration Settings
//!
//! Configuration types for the tick ingestor, loaded from environment
//! variables. Loading goes through a lookup function so tests can supply
//! variables without touching the process environment.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Utc};

use crate::application::ports::AccessToken;
use crate::application::services::BatchRetryPolicy;
use crate::infrastructure::kite::ApiKey;

/// Default Kite ticker endpoint.
pub const DEFAULT_WS_URL: &str = "wss://ws.kite.trade";

/// Feed connection settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Ticker endpoint.
    pub ws_url: String,
    /// Silence before the connection is considered dead.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Consecutive reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            heartbeat_timeout: Duration::from_secs(10),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(60),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 50,
        }
    }
}

/// PostgreSQL settings.
#[derive(Clone)]
pub struct DatabaseSettings {
    /// Daily store connection URL.
    pub url: String,
    /// Token store connection URL.
    pub token_url: String,
    /// Schema holding `broker_tokens`.
    pub token_schema: String,
    /// Schema holding the daily table.
    pub daily_schema: String,
    /// Shared daily table.
    pub daily_table: String,
    /// Pool size.
    pub max_connections: u32,
    /// Create the daily table and indexes at startup.
    pub create_schema: bool,
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("url", &"[REDACTED]")
            .field("token_url", &"[REDACTED]")
            .field("token_schema", &self.token_schema)
            .field("daily_schema", &self.daily_schema)
            .field("daily_table", &self.daily_table)
            .field("max_connections", &self.max_connections)
            .field("create_schema", &self.create_schema)
            .finish()
    }
}

/// Instrument catalog sources.
#[derive(Debug, Clone)]
pub struct CatalogSettings {
    /// Directory with the lookup CSV files.
    pub lookup_dir: PathBuf,
    /// Database label for equities and indices.
    pub equity_db: String,
    /// Database label for index options.
    pub options_db: String,
    /// Database label for bank index options.
    pub banknifty_options_db: String,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            lookup_dir: PathBuf::from("instrument_lookup_tables"),
            equity_db: "equity_db".to_string(),
            options_db: "options_db".to_string(),
            banknifty_options_db: "banknifty_options_db".to_string(),
        }
    }
}

/// Session schedule and write policy.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Exchange-local wall-clock cutoff.
    pub market_close: NaiveTime,
    /// Exchange offset from UTC.
    pub exchange_offset: FixedOffset,
    /// Grace for the in-flight write at shutdown.
    pub shutdown_grace: Duration,
    /// Failed batch handling.
    pub batch_retry: BatchRetryPolicy,
}

impl SessionSettings {
    /// Cutoff on the exchange-local day of `now`.
    #[must_use]
    pub fn cutoff_for(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local_day = now.with_timezone(&self.exchange_offset).date_naive();
        let local = local_day.and_time(self.market_close);
        self.exchange_offset
            .from_local_datetime(&local)
            .single()
            .map_or_else(|| local.and_utc(), |dt| dt.with_timezone(&Utc))
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete ingestor configuration.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    /// Broker API key.
    pub api_key: ApiKey,
    /// Access token override; skips the token store when set.
    pub access_token: Option<AccessToken>,
    /// Feed connection settings.
    pub feed: FeedSettings,
    /// Database settings.
    pub database: DatabaseSettings,
    /// Catalog sources.
    pub catalog: CatalogSettings,
    /// Schedule and write policy.
    pub session: SessionSettings,
    /// Operator webhook; log-only when unset.
    pub notify_webhook_url: Option<String>,
    /// Server ports.
    pub server: ServerSettings,
}

impl IngestorConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let api_key = env.required("KITE_API_KEY")?;
        let database_url = env.required("DATABASE_URL")?;
        let token_url = env.optional("TOKEN_DATABASE_URL").unwrap_or_else(|| database_url.clone());

        let market_close = env.optional("MARKET_CLOSE").map_or_else(
            || Ok(NaiveTime::from_hms_opt(15, 30, 0).unwrap_or(NaiveTime::MIN)),
            |value| {
                NaiveTime::parse_from_str(&value, "%H:%M").map_err(|e| ConfigError::InvalidValue {
                    key: "MARKET_CLOSE".to_string(),
                    value,
                    reason: e.to_string(),
                })
            },
        )?;
        let offset_minutes = env.parse("EXCHANGE_UTC_OFFSET_MINUTES", 330_i32);
        let exchange_offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "EXCHANGE_UTC_OFFSET_MINUTES".to_string(),
                value: offset_minutes.to_string(),
                reason: "offset out of range".to_string(),
            })?;

        let feed_defaults = FeedSettings::default();
        let feed = FeedSettings {
            ws_url: env.optional("KITE_WS_URL").unwrap_or(feed_defaults.ws_url),
            heartbeat_timeout: env.secs("FEED_HEARTBEAT_TIMEOUT_SECS", feed_defaults.heartbeat_timeout),
            reconnect_delay_initial: env.millis(
                "FEED_RECONNECT_DELAY_INITIAL_MS",
                feed_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.secs(
                "FEED_RECONNECT_DELAY_MAX_SECS",
                feed_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "FEED_RECONNECT_DELAY_MULTIPLIER",
                feed_defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse(
                "FEED_MAX_RECONNECT_ATTEMPTS",
                feed_defaults.max_reconnect_attempts,
            ),
        };

        let database = DatabaseSettings {
            url: database_url,
            token_url,
            token_schema: env.identifier("TOKEN_SCHEMA", "token_db")?,
            daily_schema: env.identifier("DAILY_SCHEMA", "equity_db")?,
            daily_table: env.identifier("DAILY_TABLE", "daily_table")?,
            max_connections: env.parse("DATABASE_MAX_CONNECTIONS", 5),
            create_schema: env.parse("INGESTOR_CREATE_SCHEMA", true),
        };

        let catalog_defaults = CatalogSettings::default();
        let catalog = CatalogSettings {
            lookup_dir: env
                .optional("LOOKUP_DIR")
                .map_or(catalog_defaults.lookup_dir, PathBuf::from),
            equity_db: env
                .optional("EQUITY_DATABASE_NAME")
                .unwrap_or(catalog_defaults.equity_db),
            options_db: env
                .optional("OPTIONS_DATABASE_NAME")
                .unwrap_or(catalog_defaults.options_db),
            banknifty_options_db: env
                .optional("BANKNIFTY_OPTIONS_DATABASE_NAME")
                .unwrap_or(catalog_defaults.banknifty_options_db),
        };

        let retries = env.parse("BATCH_RETRY_ATTEMPTS", 0_u32);
        let session = SessionSettings {
            market_close,
            exchange_offset,
            shutdown_grace: env.secs("SHUTDOWN_GRACE_SECS", Duration::from_secs(10)),
            batch_retry: BatchRetryPolicy::bounded(
                retries,
                env.millis("BATCH_RETRY_DELAY_MS", Duration::from_millis(500)),
            ),
        };

        Ok(Self {
            api_key: ApiKey::new(api_key),
            access_token: env.optional("KITE_ACCESS_TOKEN").map(AccessToken::new),
            feed,
            database,
            catalog,
            session,
            notify_webhook_url: env.optional("NOTIFY_WEBHOOK_URL"),
            server: ServerSettings {
                health_port: env.parse("INGESTOR_HEALTH_PORT", ServerSettings::default().health_port),
            },
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be used.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Variable source with typed accessors.
struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Set and non-blank, trimmed.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let raw = (self.0)(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        let value = raw.trim();
        if value.is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value.to_string())
    }

    /// Parsed value, falling back to `default` when unset or unparsable.
    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.optional(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.optional(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.optional(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    /// SQL identifier interpolated into statements: ASCII alphanumerics
    /// and underscores, not starting with a digit.
    fn identifier(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        let value = self.optional(key).unwrap_or_else(|| default.to_string());
        let valid = value
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(value)
        } else {
            Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value,
                reason: "expected an SQL identifier".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<IngestorConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        IngestorConfig::from_lookup(|key| map.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("KITE_API_KEY", "key123"),
        ("DATABASE_URL", "postgres://user:pw@localhost/market"),
    ];

    #[test]
    fn defaults_applied() {
        let config = load(&REQUIRED).unwrap();

        assert_eq!(config.feed.ws_url, DEFAULT_WS_URL);
        assert_eq!(config.feed.max_reconnect_attempts, 50);
        assert_eq!(config.database.token_url, config.database.url);
        assert_eq!(config.database.daily_table, "daily_table");
        assert_eq!(config.database.max_connections, 5);
        assert!(config.database.create_schema);
        assert_eq!(config.session.market_close, NaiveTime::from_hms_opt(15, 30, 0).unwrap());
        assert_eq!(config.session.exchange_offset.local_minus_utc(), 330 * 60);
        assert_eq!(config.session.batch_retry.retries, 0);
        assert_eq!(config.server.health_port, 8083);
        assert!(config.access_token.is_none());
        assert!(config.notify_webhook_url.is_none());
    }

    #[test]
    fn missing_and_empty_required() {
        assert!(matches!(
            load(&[("DATABASE_URL", "postgres://x")]),
            Err(ConfigError::MissingEnvVar(key)) if key == "KITE_API_KEY"
        ));
        assert!(matches!(
            load(&[("KITE_API_KEY", "  "), ("DATABASE_URL", "postgres://x")]),
            Err(ConfigError::EmptyValue(key)) if key == "KITE_API_KEY"
        ));
    }

    #[test]
    fn bad_market_close_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("MARKET_CLOSE", "3:30pm"));
        assert!(matches!(load(&vars), Err(ConfigError::InvalidValue { key, .. }) if key == "MARKET_CLOSE"));
    }

    #[test]
    fn unsafe_identifier_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("DAILY_TABLE", "daily; drop table x"));
        assert!(matches!(load(&vars), Err(ConfigError::InvalidValue { key, .. }) if key == "DAILY_TABLE"));
    }

    #[test]
    fn unparsable_optional_falls_back() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("DATABASE_MAX_CONNECTIONS", "many"));
        vars.push(("BATCH_RETRY_ATTEMPTS", "2"));
        let config = load(&vars).unwrap();
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.session.batch_retry.retries, 2);
        assert_eq!(config.session.batch_retry.delay, Duration::from_millis(500));
    }

    #[test]
    fn secrets_redacted_in_debug() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("KITE_ACCESS_TOKEN", "tok789"));
        let debug = format!("{:?}", load(&vars).unwrap());
        assert!(!debug.contains("key123"));
        assert!(!debug.contains("tok789"));
        assert!(!debug.contains("user:pw"));
    }

    #[test]
    fn cutoff_uses_exchange_day() {
        let config = load(&REQUIRED).unwrap();
        // 2024-03-04 20:00 UTC is already 2024-03-05 01:30 IST.
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 20, 0, 0).unwrap();
        let cutoff = config.session.cutoff_for(now);
        assert_eq!(cutoff, Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap());

        let morning = Utc.with_ymd_and_hms(2024, 3, 4, 3, 45, 0).unwrap();
        assert_eq!(
            config.session.cutoff_for(morning),
            Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()
        );
    }
}

//! Session Provider Adapters
//!
//! Credential sources for the streaming connection: the broker token
//! table written by the login job, or a fixed token.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use crate::application::ports::{AccessToken, SessionProvider};
use crate::application::services::SessionError;

/// `undefined_table` SQLSTATE.
const UNDEFINED_TABLE: &str = "42P01";

/// Reads the latest token from `{schema}.broker_tokens`.
#[derive(Debug, Clone)]
pub struct PostgresSessionProvider {
    pool: PgPool,
    query: String,
}

impl PostgresSessionProvider {
    /// Create a provider reading from `schema`.
    ///
    /// The schema name is interpolated into SQL and must already be
    /// validated.
    #[must_use]
    pub fn new(pool: PgPool, schema: &str) -> Self {
        Self {
            pool,
            query: latest_token_query(schema),
        }
    }
}

fn latest_token_query(schema: &str) -> String {
    format!(
        "SELECT access_token FROM {}.broker_tokens ORDER BY timestamp DESC LIMIT 1",
        schema.to_ascii_lowercase()
    )
}

#[async_trait]
impl SessionProvider for PostgresSessionProvider {
    async fn latest_token(&self) -> Result<Option<AccessToken>, SessionError> {
        let result = sqlx::query_scalar::<_, Option<String>>(&self.query)
            .fetch_optional(&self.pool)
            .await;

        match result {
            Ok(token) => Ok(token.flatten().map(AccessToken::new)),
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some(UNDEFINED_TABLE) => {
                debug!("Token table does not exist");
                Ok(None)
            }
            Err(e) => Err(SessionError::CredentialLookup(e.to_string())),
        }
    }
}

/// Fixed credential.
#[derive(Debug, Clone, Default)]
pub struct StaticSessionProvider {
    token: Option<AccessToken>,
}

impl StaticSessionProvider {
    /// Provider that always returns `token`.
    #[must_use]
    pub const fn new(token: AccessToken) -> Self {
        Self { token: Some(token) }
    }

    /// Provider with no credential.
    #[must_use]
    pub const fn empty() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn latest_token(&self) -> Result<Option<AccessToken>, SessionError> {
        Ok(self.token.clone().filter(|token| !token.is_blank()))
    }
}

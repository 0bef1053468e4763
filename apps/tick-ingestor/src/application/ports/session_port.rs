//! Session Provider Port (Driven Port)
//!
//! Interface for obtaining the access credential used to open the
//! streaming connection.

use std::fmt;

use async_trait::async_trait;

use crate::application::services::SessionError;

/// Broker access token. Redacted in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token (only for building the connection URL).
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the token is blank.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Source of the current access credential.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Latest valid token, or `None` if none is available.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CredentialLookup`] if the source could not
    /// be queried.
    async fn latest_token(&self) -> Result<Option<AccessToken>, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let token = AccessToken::new("secret-token");
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret"));
        assert_eq!(token.expose(), "secret-token");
    }

    #[test]
    fn blank_token_detected() {
        assert!(AccessToken::new("  ").is_blank());
        assert!(!AccessToken::new("x").is_blank());
    }
}

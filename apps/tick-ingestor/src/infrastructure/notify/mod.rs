//! Notification Adapters
//!
//! [`Notifier`] implementations. Delivery never blocks the caller: the
//! webhook adapter posts on a spawned task and only logs failures.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::application::ports::Notifier;

/// Notification delivery failure.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Request could not be sent.
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Endpoint answered with an error status.
    #[error("webhook returned status {0}")]
    Status(reqwest::StatusCode),
}

/// Logs notifications at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, subject: &str, body: &str) {
        warn!(subject, body, "Operator notification");
    }
}

/// Webhook payload.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationPayload {
    /// Short summary.
    pub subject: String,
    /// Details.
    pub body: String,
    /// Time the notification was raised.
    pub sent_at: DateTime<Utc>,
}

/// Posts notifications as JSON to an operator webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Request timeout.
    pub const TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a notifier posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(Self::TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Post one payload and wait for the response.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] on transport failure or a non-success status.
    pub async fn deliver(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        let response = self.client.post(&self.url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status));
        }
        debug!(subject = %payload.subject, "Notification delivered");
        Ok(())
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, subject: &str, body: &str) {
        let payload = NotificationPayload {
            subject: subject.to_string(),
            body: body.to_string(),
            sent_at: Utc::now(),
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(subject, "No runtime available for webhook delivery");
            return;
        };
        let notifier = self.clone();
        runtime.spawn(async move {
            if let Err(e) = notifier.deliver(&payload).await {
                error!(subject = %payload.subject, error = %e, "Notification delivery failed");
            }
        });
    }
}

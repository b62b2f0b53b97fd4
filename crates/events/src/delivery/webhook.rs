//! Webhook delivery with exponential-backoff retry.
//!
//! [`WebhookAdapter`] POSTs the notification as JSON to the configured
//! endpoint. Failed attempts are retried three times with exponential
//! backoff (1 s, 2 s, 4 s). Without a configured endpoint every attempt is a
//! soft failure.

use std::time::Duration;

use async_trait::async_trait;
use herald_core::channels::DeliveryMethod;
use herald_db::models::notification::Notification;
use herald_db::models::recipient::Recipient;

use super::{ChannelAdapter, DeliveryOutcome};

/// Retry delays in seconds (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure detail recorded when no endpoint is configured.
pub const WEBHOOK_NOT_CONFIGURED: &str = "webhook_not_configured";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for webhook delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct WebhookConfig {
    pub url: Option<String>,
}

impl WebhookConfig {
    /// | Variable      | Required | Default |
    /// |---------------|----------|---------|
    /// | `WEBHOOK_URL` | no       |         |
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("WEBHOOK_URL").ok().filter(|u| !u.is_empty()),
        }
    }
}

// ---------------------------------------------------------------------------
// WebhookAdapter
// ---------------------------------------------------------------------------

pub struct WebhookAdapter {
    client: reqwest::Client,
    url: Option<String>,
}

impl WebhookAdapter {
    pub fn new(config: WebhookConfig) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: config.url,
        })
    }

    /// Deliver a payload to `url`, retrying with backoff before giving up.
    pub async fn deliver(&self, url: &str, payload: &serde_json::Value) -> Result<(), WebhookError> {
        let mut last_err: Option<WebhookError> = None;

        for (attempt, delay_secs) in RETRY_DELAYS_SECS.iter().enumerate() {
            match self.try_send(url, payload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        url,
                        error = %e,
                        "Webhook delivery attempt failed, retrying"
                    );
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_secs(*delay_secs)).await;
                }
            }
        }

        // Final attempt after the last backoff.
        match self.try_send(url, payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(url, error = %e, "Webhook delivery failed after all retries");
                Err(last_err.unwrap_or(e))
            }
        }
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, url: &str, payload: &serde_json::Value) -> Result<(), WebhookError> {
        let response = self.client.post(url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Body posted for a notification.
pub fn webhook_payload(notification: &Notification) -> serde_json::Value {
    serde_json::json!({
        "event": "notification.created",
        "user_id": notification.user_id,
        "notification": notification,
    })
}

#[async_trait]
impl ChannelAdapter for WebhookAdapter {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::Webhook
    }

    async fn send(&self, _recipient: &Recipient, notification: &Notification) -> DeliveryOutcome {
        let Some(url) = &self.url else {
            return DeliveryOutcome::failed(WEBHOOK_NOT_CONFIGURED);
        };
        match self.deliver(url, &webhook_payload(notification)).await {
            Ok(()) => DeliveryOutcome::sent(),
            Err(e) => DeliveryOutcome::failed(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

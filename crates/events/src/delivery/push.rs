//! Mobile push delivery.
//!
//! [`PushAdapter`] looks up a user's active device tokens, partitions them
//! by platform and makes one [`PushProvider`] call per platform. Platforms
//! are attempted concurrently and independently: a provider failure on iOS
//! does not prevent the Android batch. Tokens the provider reports as invalid
//! are deactivated.
//!
//! The adapter also owns device-token management (registration,
//! unregistration, listing and the inactive-token cleanup sweep).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use herald_core::channels::{DeliveryMethod, Platform};
use herald_core::error::CoreError;
use herald_core::types::DbId;
use herald_db::models::device_token::{DeviceToken, RegisterDeviceToken};
use herald_db::models::notification::Notification;
use herald_db::models::recipient::Recipient;
use herald_db::SharedStore;
use serde::{Deserialize, Serialize};

use super::{ChannelAdapter, DeliveryOutcome};

/// Failure detail recorded when no push provider is configured.
pub const PUSH_NOT_CONFIGURED: &str = "push_not_configured";

/// Failure detail recorded when the user has no active device.
pub const NO_DEVICE_TOKENS: &str = "no_device_tokens";

/// Longest accepted token string.
const MAX_TOKEN_LEN: usize = 4096;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The gateway returned a non-2xx status code.
    #[error("Push gateway returned HTTP {0}")]
    HttpStatus(u16),

    /// No gateway is configured for the platform.
    #[error("No push gateway configured for {0}")]
    NotConfigured(Platform),
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// What is shown on the device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

impl PushPayload {
    pub fn for_notification(notification: &Notification) -> Self {
        Self {
            title: notification.title.clone(),
            body: notification.message.clone(),
            data: serde_json::json!({
                "notification_id": notification.id,
                "category": notification.category,
                "link": notification.link,
            }),
        }
    }
}

/// Provider response for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushBatchResult {
    #[serde(default)]
    pub sent: usize,
    #[serde(default)]
    pub failed: usize,
    /// Tokens the provider no longer recognises.
    #[serde(default)]
    pub invalid_tokens: Vec<String>,
}

/// An opaque per-platform push gateway.
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send_batch(
        &self,
        platform: Platform,
        tokens: &[String],
        payload: &PushPayload,
    ) -> Result<PushBatchResult, PushError>;
}

/// Default request timeout for a gateway call.
const DEFAULT_PUSH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Default)]
pub struct PushConfig {
    pub ios_url: Option<String>,
    pub android_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl PushConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` when neither gateway URL is set.
    ///
    /// | Variable            | Required | Default |
    /// |---------------------|----------|---------|
    /// | `PUSH_IOS_URL`      | no       |         |
    /// | `PUSH_ANDROID_URL`  | no       |         |
    /// | `PUSH_API_KEY`      | no       |         |
    /// | `PUSH_TIMEOUT_SECS` | no       | `10`    |
    pub fn from_env() -> Option<Self> {
        let ios_url = std::env::var("PUSH_IOS_URL").ok();
        let android_url = std::env::var("PUSH_ANDROID_URL").ok();
        if ios_url.is_none() && android_url.is_none() {
            return None;
        }
        Some(Self {
            ios_url,
            android_url,
            api_key: std::env::var("PUSH_API_KEY").ok(),
            timeout: Duration::from_secs(
                std::env::var("PUSH_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_PUSH_TIMEOUT_SECS),
            ),
        })
    }

    fn url_for(&self, platform: Platform) -> Option<&str> {
        match platform {
            Platform::Ios => self.ios_url.as_deref(),
            Platform::Android => self.android_url.as_deref(),
        }
    }
}

/// [`PushProvider`] that POSTs each batch as JSON to a per-platform gateway.
pub struct HttpPushProvider {
    client: reqwest::Client,
    config: PushConfig,
}

impl HttpPushProvider {
    pub fn new(config: PushConfig) -> Result<Self, PushError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl PushProvider for HttpPushProvider {
    async fn send_batch(
        &self,
        platform: Platform,
        tokens: &[String],
        payload: &PushPayload,
    ) -> Result<PushBatchResult, PushError> {
        let url = self
            .config
            .url_for(platform)
            .ok_or(PushError::NotConfigured(platform))?;

        let body = serde_json::json!({
            "platform": platform,
            "tokens": tokens,
            "notification": payload,
        });
        let mut request = self.client.post(url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(PushError::HttpStatus(response.status().as_u16()));
        }
        Ok(response.json::<PushBatchResult>().await?)
    }
}

// ---------------------------------------------------------------------------
// PushAdapter
// ---------------------------------------------------------------------------

/// Aggregated counts of one push dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub sent: usize,
    pub failed: usize,
}

pub struct PushAdapter {
    store: SharedStore,
    provider: Option<Arc<dyn PushProvider>>,
}

impl PushAdapter {
    /// `provider = None` means push is not configured in this environment.
    pub fn new(store: SharedStore, provider: Option<Arc<dyn PushProvider>>) -> Self {
        Self { store, provider }
    }

    // -----------------------------------------------------------------------
    // Token management
    // -----------------------------------------------------------------------

    /// Register a device token for a user. A token already registered to
    /// another user is moved to this one.
    pub async fn register_device_token(
        &self,
        user_id: DbId,
        token: &str,
        platform: Platform,
        device_name: Option<&str>,
    ) -> Result<DeviceToken, CoreError> {
        let token = token.trim();
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return Err(CoreError::Validation(format!(
                "Device token must be between 1 and {MAX_TOKEN_LEN} characters"
            )));
        }
        let input = RegisterDeviceToken {
            user_id,
            token: token.to_string(),
            platform: platform.as_str().to_string(),
            device_name: device_name.map(str::to_string),
        };
        let saved = self.store.upsert_device_token(&input).await?;
        tracing::info!(user_id, platform = %platform, token_id = saved.id, "Device token registered");
        Ok(saved)
    }

    /// Deactivate one of the user's tokens. Not-found if the token is
    /// unknown or belongs to someone else.
    pub async fn unregister_device_token(&self, user_id: DbId, token: &str) -> Result<(), CoreError> {
        let token = token.trim();
        let not_found = || CoreError::NotFoundByKey {
            entity: "DeviceToken",
            key: token.to_string(),
        };
        let existing = self.store.find_device_token(token).await?.ok_or_else(not_found)?;
        if existing.user_id != user_id {
            return Err(not_found());
        }
        self.store.deactivate_device_token(user_id, token).await?;
        tracing::info!(user_id, token_id = existing.id, "Device token unregistered");
        Ok(())
    }

    /// Active tokens of the user, optionally for one platform.
    pub async fn list_device_tokens(
        &self,
        user_id: DbId,
        platform: Option<Platform>,
    ) -> Result<Vec<DeviceToken>, CoreError> {
        Ok(self.store.list_device_tokens(user_id, platform, true).await?)
    }

    /// Hard-delete tokens that have been inactive for `older_than_days`.
    pub async fn cleanup_inactive_tokens(&self, older_than_days: u32) -> Result<u64, CoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(older_than_days));
        let deleted = self.store.delete_inactive_tokens(cutoff).await?;
        if deleted > 0 {
            tracing::info!(deleted, older_than_days, "Inactive device tokens removed");
        }
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Push to every active device of `user_id`, one provider call per
    /// platform.
    pub async fn push_to_user(
        &self,
        user_id: DbId,
        payload: &PushPayload,
    ) -> Result<PushSummary, CoreError> {
        let Some(provider) = &self.provider else {
            return Ok(PushSummary::default());
        };

        let tokens = self.store.list_device_tokens(user_id, None, true).await?;
        let mut by_platform: BTreeMap<Platform, Vec<String>> = BTreeMap::new();
        for t in tokens {
            match t.platform.parse::<Platform>() {
                Ok(platform) => by_platform.entry(platform).or_default().push(t.token),
                Err(e) => tracing::warn!(token_id = t.id, error = %e, "Skipping token with unknown platform"),
            }
        }

        let calls = by_platform.iter().map(|(platform, tokens)| async move {
            (*platform, tokens, provider.send_batch(*platform, tokens, payload).await)
        });
        let results = futures::future::join_all(calls).await;

        let mut summary = PushSummary::default();
        let mut invalid = Vec::new();
        let mut reached = Vec::new();
        for (platform, tokens, result) in results {
            match result {
                Ok(batch) => {
                    summary.sent += batch.sent;
                    summary.failed += batch.failed;
                    reached.extend(
                        tokens
                            .iter()
                            .filter(|t| !batch.invalid_tokens.contains(*t))
                            .cloned(),
                    );
                    invalid.extend(batch.invalid_tokens);
                }
                Err(e) => {
                    tracing::warn!(user_id, platform = %platform, error = %e, "Push batch failed");
                    summary.failed += tokens.len();
                }
            }
        }

        if !invalid.is_empty() {
            match self.store.deactivate_tokens(&invalid).await {
                Ok(n) => tracing::info!(user_id, deactivated = n, "Deactivated invalid device tokens"),
                Err(e) => tracing::warn!(user_id, error = %e, "Failed to deactivate invalid tokens"),
            }
        }
        if summary.sent > 0 && !reached.is_empty() {
            if let Err(e) = self.store.touch_device_tokens(&reached).await {
                tracing::debug!(user_id, error = %e, "Failed to stamp device token usage");
            }
        }

        Ok(summary)
    }
}

#[async_trait]
impl ChannelAdapter for PushAdapter {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::Push
    }

    async fn send(&self, recipient: &Recipient, notification: &Notification) -> DeliveryOutcome {
        if self.provider.is_none() {
            return DeliveryOutcome::failed(PUSH_NOT_CONFIGURED);
        }
        let payload = PushPayload::for_notification(notification);
        match self.push_to_user(recipient.user_id, &payload).await {
            Ok(PushSummary { sent: 0, failed: 0 }) => DeliveryOutcome::failed(NO_DEVICE_TOKENS),
            Ok(PushSummary { sent: 0, failed }) => {
                DeliveryOutcome::failed(format!("push failed on {failed} device(s)"))
            }
            Ok(PushSummary { sent, failed }) => {
                DeliveryOutcome::sent_with(format!("sent={sent} failed={failed}"))
            }
            Err(e) => DeliveryOutcome::failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use herald_db::MemoryStore;

    use super::*;

    fn adapter() -> PushAdapter {
        PushAdapter::new(Arc::new(MemoryStore::new()), None)
    }

    #[test]
    fn push_error_display_http_status() {
        assert_eq!(
            PushError::HttpStatus(503).to_string(),
            "Push gateway returned HTTP 503"
        );
    }

    #[test]
    fn batch_result_fields_default() {
        let parsed: PushBatchResult = serde_json::from_str(r#"{"sent": 2}"#).unwrap();
        assert_eq!(parsed.sent, 2);
        assert_eq!(parsed.failed, 0);
        assert!(parsed.invalid_tokens.is_empty());
    }

    #[tokio::test]
    async fn gateway_without_platform_url_is_not_configured() {
        let provider = HttpPushProvider::new(PushConfig {
            ios_url: None,
            android_url: None,
            api_key: None,
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        let payload = PushPayload {
            title: "t".into(),
            body: "b".into(),
            data: serde_json::Value::Null,
        };
        assert_matches!(
            provider.send_batch(Platform::Ios, &["a".to_string()], &payload).await,
            Err(PushError::NotConfigured(Platform::Ios))
        );
    }

    #[tokio::test]
    async fn unregister_foreign_token_is_not_found() {
        let push = adapter();
        push.register_device_token(1, "tok", Platform::Android, None)
            .await
            .unwrap();
        assert_matches!(
            push.unregister_device_token(2, "tok").await,
            Err(CoreError::NotFoundByKey { .. })
        );
        assert_matches!(
            push.unregister_device_token(1, "missing").await,
            Err(CoreError::NotFoundByKey { .. })
        );
        push.unregister_device_token(1, "tok").await.unwrap();
        assert!(push.list_device_tokens(1, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_token_is_rejected() {
        assert_matches!(
            adapter()
                .register_device_token(1, "  ", Platform::Ios, None)
                .await,
            Err(CoreError::Validation(_))
        );
    }

    #[tokio::test]
    async fn unconfigured_provider_is_a_soft_failure() {
        let push = adapter();
        let notification = Notification {
            id: 1,
            user_id: 1,
            category: "system".into(),
            title: "t".into(),
            message: "m".into(),
            link: None,
            icon: None,
            data: serde_json::json!({}),
            is_read: false,
            read_at: None,
            created_at: Utc::now(),
        };
        let outcome = push.send(&Recipient::unknown(1), &notification).await;
        assert_eq!(outcome.detail.as_deref(), Some(PUSH_NOT_CONFIGURED));
    }
}

//! Entity-store traits consumed by the delivery services.
//!
//! Services hold a [`SharedStore`] and never see sqlx directly, so the same
//! dispatcher runs against PostgreSQL ([`PgStore`]) or the in-process
//! [`MemoryStore`](crate::MemoryStore).

use std::sync::Arc;

use async_trait::async_trait;
use herald_core::channels::Platform;
use herald_core::funnel::FunnelState;
use herald_core::types::{DbId, Timestamp};

use crate::error::{StoreError, StoreResult};
use crate::models::analytics::{
    AnalyticsFilter, AttemptKey, DeliveryAnalytics, NewDeliveryAnalytics,
};
use crate::models::device_token::{DeviceToken, RegisterDeviceToken};
use crate::models::digest::{DigestEntry, NewDigestEntry};
use crate::models::notification::{CreateNotification, Notification};
use crate::models::preference::{
    NotificationPreference, PreferenceConfig, PreferenceDefault, UpdatePreference,
};
use crate::models::recipient::Recipient;
use crate::repositories::{
    DeliveryAnalyticsRepo, DeviceTokenRepo, DigestRepo, NotificationPreferenceRepo,
    NotificationRepo, UserRepo,
};
use crate::DbPool;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create_notification(&self, input: &CreateNotification) -> StoreResult<Notification>;

    /// A notification owned by `user_id`, `None` if absent or foreign.
    async fn get_notification(&self, id: DbId, user_id: DbId)
        -> StoreResult<Option<Notification>>;

    async fn list_notifications_by_ids(
        &self,
        user_id: DbId,
        ids: &[DbId],
    ) -> StoreResult<Vec<Notification>>;

    async fn list_notifications(
        &self,
        user_id: DbId,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Notification>>;

    async fn mark_read(&self, id: DbId, user_id: DbId) -> StoreResult<bool>;

    async fn mark_all_read(&self, user_id: DbId) -> StoreResult<u64>;

    async fn unread_count(&self, user_id: DbId) -> StoreResult<i64>;
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get_preference(
        &self,
        user_id: DbId,
        category: &str,
    ) -> StoreResult<Option<NotificationPreference>>;

    async fn list_preferences(&self, user_id: DbId) -> StoreResult<Vec<NotificationPreference>>;

    async fn upsert_preference(
        &self,
        user_id: DbId,
        input: &UpdatePreference,
    ) -> StoreResult<NotificationPreference>;

    /// Remove all explicit preferences of a user. Returns the number removed.
    async fn delete_preferences(&self, user_id: DbId) -> StoreResult<u64>;

    async fn get_default(&self, category: &str) -> StoreResult<Option<PreferenceDefault>>;

    async fn list_defaults(&self) -> StoreResult<Vec<PreferenceDefault>>;

    async fn upsert_default(
        &self,
        category: &str,
        config: &PreferenceConfig,
    ) -> StoreResult<PreferenceDefault>;
}

#[async_trait]
pub trait DeviceTokenStore: Send + Sync {
    /// Register a token; a token already known for another user moves to
    /// `input.user_id` and is reactivated.
    async fn upsert_device_token(&self, input: &RegisterDeviceToken) -> StoreResult<DeviceToken>;

    async fn find_device_token(&self, token: &str) -> StoreResult<Option<DeviceToken>>;

    /// Deactivate one of the user's tokens. `false` if nothing changed.
    async fn deactivate_device_token(&self, user_id: DbId, token: &str) -> StoreResult<bool>;

    /// Deactivate tokens regardless of owner.
    async fn deactivate_tokens(&self, tokens: &[String]) -> StoreResult<u64>;

    async fn list_device_tokens(
        &self,
        user_id: DbId,
        platform: Option<Platform>,
        active_only: bool,
    ) -> StoreResult<Vec<DeviceToken>>;

    /// Delete inactive tokens last updated before `cutoff`.
    async fn delete_inactive_tokens(&self, cutoff: Timestamp) -> StoreResult<u64>;

    /// Stamp `last_used_at` on tokens that just received a push.
    async fn touch_device_tokens(&self, tokens: &[String]) -> StoreResult<u64>;
}

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn get_analytics(&self, key: &AttemptKey) -> StoreResult<Option<DeliveryAnalytics>>;

    /// Insert the first record of an attempt; [`StoreError::Conflict`] if one
    /// already exists.
    async fn insert_analytics(&self, input: &NewDeliveryAnalytics)
        -> StoreResult<DeliveryAnalytics>;

    /// Compare-and-set update: only applies while the stored status and
    /// retry count still equal those of `current`. Returns whether the write
    /// happened.
    async fn update_analytics(
        &self,
        current: &DeliveryAnalytics,
        state: &FunnelState,
    ) -> StoreResult<bool>;

    async fn list_analytics(&self, filter: &AnalyticsFilter)
        -> StoreResult<Vec<DeliveryAnalytics>>;
}

#[async_trait]
pub trait DigestStore: Send + Sync {
    async fn enqueue_digest(&self, input: &NewDigestEntry) -> StoreResult<DigestEntry>;

    async fn list_pending_digests(&self, frequency: &str) -> StoreResult<Vec<DigestEntry>>;

    async fn mark_digests_compiled(&self, ids: &[DbId]) -> StoreResult<u64>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_recipient(&self, user_id: DbId) -> StoreResult<Option<Recipient>>;
}

/// Everything the delivery core persists.
pub trait EntityStore:
    NotificationStore + PreferenceStore + DeviceTokenStore + AnalyticsStore + DigestStore + UserDirectory
{
}

impl<T> EntityStore for T where
    T: NotificationStore
        + PreferenceStore
        + DeviceTokenStore
        + AnalyticsStore
        + DigestStore
        + UserDirectory
{
}

/// Store handle shared between services.
pub type SharedStore = Arc<dyn EntityStore>;

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// [`EntityStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn create_notification(&self, input: &CreateNotification) -> StoreResult<Notification> {
        Ok(NotificationRepo::create(&self.pool, input).await?)
    }

    async fn get_notification(
        &self,
        id: DbId,
        user_id: DbId,
    ) -> StoreResult<Option<Notification>> {
        Ok(NotificationRepo::find_for_user(&self.pool, id, user_id).await?)
    }

    async fn list_notifications_by_ids(
        &self,
        user_id: DbId,
        ids: &[DbId],
    ) -> StoreResult<Vec<Notification>> {
        Ok(NotificationRepo::list_by_ids(&self.pool, user_id, ids).await?)
    }

    async fn list_notifications(
        &self,
        user_id: DbId,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Notification>> {
        Ok(NotificationRepo::list_for_user(&self.pool, user_id, unread_only, limit, offset).await?)
    }

    async fn mark_read(&self, id: DbId, user_id: DbId) -> StoreResult<bool> {
        Ok(NotificationRepo::mark_read(&self.pool, id, user_id).await?)
    }

    async fn mark_all_read(&self, user_id: DbId) -> StoreResult<u64> {
        Ok(NotificationRepo::mark_all_read(&self.pool, user_id).await?)
    }

    async fn unread_count(&self, user_id: DbId) -> StoreResult<i64> {
        Ok(NotificationRepo::unread_count(&self.pool, user_id).await?)
    }
}

#[async_trait]
impl PreferenceStore for PgStore {
    async fn get_preference(
        &self,
        user_id: DbId,
        category: &str,
    ) -> StoreResult<Option<NotificationPreference>> {
        Ok(NotificationPreferenceRepo::get_for_category(&self.pool, user_id, category).await?)
    }

    async fn list_preferences(&self, user_id: DbId) -> StoreResult<Vec<NotificationPreference>> {
        Ok(NotificationPreferenceRepo::list_for_user(&self.pool, user_id).await?)
    }

    async fn upsert_preference(
        &self,
        user_id: DbId,
        input: &UpdatePreference,
    ) -> StoreResult<NotificationPreference> {
        NotificationPreferenceRepo::upsert(&self.pool, user_id, input)
            .await
            .map_err(StoreError::from_sqlx)
    }

    async fn delete_preferences(&self, user_id: DbId) -> StoreResult<u64> {
        Ok(NotificationPreferenceRepo::delete_for_user(&self.pool, user_id).await?)
    }

    async fn get_default(&self, category: &str) -> StoreResult<Option<PreferenceDefault>> {
        Ok(NotificationPreferenceRepo::get_default(&self.pool, category).await?)
    }

    async fn list_defaults(&self) -> StoreResult<Vec<PreferenceDefault>> {
        Ok(NotificationPreferenceRepo::list_defaults(&self.pool).await?)
    }

    async fn upsert_default(
        &self,
        category: &str,
        config: &PreferenceConfig,
    ) -> StoreResult<PreferenceDefault> {
        NotificationPreferenceRepo::upsert_default(&self.pool, category, config)
            .await
            .map_err(StoreError::from_sqlx)
    }
}

#[async_trait]
impl DeviceTokenStore for PgStore {
    async fn upsert_device_token(&self, input: &RegisterDeviceToken) -> StoreResult<DeviceToken> {
        DeviceTokenRepo::upsert(&self.pool, input)
            .await
            .map_err(StoreError::from_sqlx)
    }

    async fn find_device_token(&self, token: &str) -> StoreResult<Option<DeviceToken>> {
        Ok(DeviceTokenRepo::find_by_token(&self.pool, token).await?)
    }

    async fn deactivate_device_token(&self, user_id: DbId, token: &str) -> StoreResult<bool> {
        Ok(DeviceTokenRepo::deactivate_for_user(&self.pool, user_id, token).await?)
    }

    async fn deactivate_tokens(&self, tokens: &[String]) -> StoreResult<u64> {
        Ok(DeviceTokenRepo::deactivate_many(&self.pool, tokens).await?)
    }

    async fn list_device_tokens(
        &self,
        user_id: DbId,
        platform: Option<Platform>,
        active_only: bool,
    ) -> StoreResult<Vec<DeviceToken>> {
        let platform = platform.map(|p| p.as_str());
        Ok(DeviceTokenRepo::list_for_user(&self.pool, user_id, platform, active_only).await?)
    }

    async fn delete_inactive_tokens(&self, cutoff: Timestamp) -> StoreResult<u64> {
        Ok(DeviceTokenRepo::delete_inactive_before(&self.pool, cutoff).await?)
    }

    async fn touch_device_tokens(&self, tokens: &[String]) -> StoreResult<u64> {
        Ok(DeviceTokenRepo::touch_many(&self.pool, tokens).await?)
    }
}

#[async_trait]
impl AnalyticsStore for PgStore {
    async fn get_analytics(&self, key: &AttemptKey) -> StoreResult<Option<DeliveryAnalytics>> {
        Ok(DeliveryAnalyticsRepo::find(&self.pool, key).await?)
    }

    async fn insert_analytics(
        &self,
        input: &NewDeliveryAnalytics,
    ) -> StoreResult<DeliveryAnalytics> {
        DeliveryAnalyticsRepo::insert(&self.pool, input)
            .await
            .map_err(StoreError::from_sqlx)
    }

    async fn update_analytics(
        &self,
        current: &DeliveryAnalytics,
        state: &FunnelState,
    ) -> StoreResult<bool> {
        Ok(DeliveryAnalyticsRepo::compare_and_update(&self.pool, current, state).await?)
    }

    async fn list_analytics(
        &self,
        filter: &AnalyticsFilter,
    ) -> StoreResult<Vec<DeliveryAnalytics>> {
        Ok(DeliveryAnalyticsRepo::list(&self.pool, filter).await?)
    }
}

#[async_trait]
impl DigestStore for PgStore {
    async fn enqueue_digest(&self, input: &NewDigestEntry) -> StoreResult<DigestEntry> {
        Ok(DigestRepo::create(&self.pool, input).await?)
    }

    async fn list_pending_digests(&self, frequency: &str) -> StoreResult<Vec<DigestEntry>> {
        Ok(DigestRepo::list_pending(&self.pool, frequency).await?)
    }

    async fn mark_digests_compiled(&self, ids: &[DbId]) -> StoreResult<u64> {
        Ok(DigestRepo::mark_compiled(&self.pool, ids).await?)
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn find_recipient(&self, user_id: DbId) -> StoreResult<Option<Recipient>> {
        Ok(UserRepo::find_recipient(&self.pool, user_id).await?)
    }
}

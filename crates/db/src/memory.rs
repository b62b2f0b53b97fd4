//! In-process [`EntityStore`](crate::EntityStore) implementation.
//!
//! Used by the test suites and by the API server when `DATABASE_URL` is not
//! set. Rows live in plain vectors behind a mutex; the lock is never held
//! across an `.await`.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use herald_core::channels::Platform;
use herald_core::funnel::FunnelState;
use herald_core::types::{DbId, Timestamp};
use serde_json::json;

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
use crate::store::{
    AnalyticsStore, DeviceTokenStore, DigestStore, NotificationStore, PreferenceStore,
    UserDirectory,
};

#[derive(Default)]
struct Tables {
    next_id: DbId,
    notifications: Vec<Notification>,
    preferences: Vec<NotificationPreference>,
    defaults: Vec<PreferenceDefault>,
    device_tokens: Vec<DeviceToken>,
    analytics: Vec<DeliveryAnalytics>,
    digests: Vec<DigestEntry>,
    users: Vec<Recipient>,
}

impl Tables {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a row in the user directory.
    pub fn add_user(&self, recipient: Recipient) {
        let mut t = self.lock();
        t.users.retain(|u| u.user_id != recipient.user_id);
        t.users.push(recipient);
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // A panic while holding the lock cannot leave a row half-written.
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create_notification(&self, input: &CreateNotification) -> StoreResult<Notification> {
        let mut t = self.lock();
        let row = Notification {
            id: t.next_id(),
            user_id: input.user_id,
            category: input.category.clone(),
            title: input.title.clone(),
            message: input.message.clone(),
            link: input.link.clone(),
            icon: input.icon.clone(),
            data: input.data.clone().unwrap_or_else(|| json!({})),
            is_read: false,
            read_at: None,
            created_at: Utc::now(),
        };
        t.notifications.push(row.clone());
        Ok(row)
    }

    async fn get_notification(
        &self,
        id: DbId,
        user_id: DbId,
    ) -> StoreResult<Option<Notification>> {
        Ok(self
            .lock()
            .notifications
            .iter()
            .find(|n| n.id == id && n.user_id == user_id)
            .cloned())
    }

    async fn list_notifications_by_ids(
        &self,
        user_id: DbId,
        ids: &[DbId],
    ) -> StoreResult<Vec<Notification>> {
        Ok(self
            .lock()
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && ids.contains(&n.id))
            .cloned()
            .collect())
    }

    async fn list_notifications(
        &self,
        user_id: DbId,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Notification>> {
        let t = self.lock();
        Ok(t.notifications
            .iter()
            .rev()
            .filter(|n| n.user_id == user_id && (!unread_only || !n.is_read))
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, id: DbId, user_id: DbId) -> StoreResult<bool> {
        let mut t = self.lock();
        match t
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user_id)
        {
            Some(n) => {
                n.is_read = true;
                n.read_at.get_or_insert_with(Utc::now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_read(&self, user_id: DbId) -> StoreResult<u64> {
        let mut t = self.lock();
        let now = Utc::now();
        let mut changed = 0;
        for n in t
            .notifications
            .iter_mut()
            .filter(|n| n.user_id == user_id && !n.is_read)
        {
            n.is_read = true;
            n.read_at = Some(now);
            changed += 1;
        }
        Ok(changed)
    }

    async fn unread_count(&self, user_id: DbId) -> StoreResult<i64> {
        Ok(self
            .lock()
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .count() as i64)
    }
}

// ---------------------------------------------------------------------------
// Preferences
// ---------------------------------------------------------------------------

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn get_preference(
        &self,
        user_id: DbId,
        category: &str,
    ) -> StoreResult<Option<NotificationPreference>> {
        Ok(self
            .lock()
            .preferences
            .iter()
            .find(|p| p.user_id == user_id && p.category == category)
            .cloned())
    }

    async fn list_preferences(&self, user_id: DbId) -> StoreResult<Vec<NotificationPreference>> {
        let mut rows: Vec<_> = self
            .lock()
            .preferences
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.category.cmp(&b.category));
        Ok(rows)
    }

    async fn upsert_preference(
        &self,
        user_id: DbId,
        input: &UpdatePreference,
    ) -> StoreResult<NotificationPreference> {
        let mut t = self.lock();
        let now = Utc::now();
        let c = &input.config;
        if let Some(row) = t
            .preferences
            .iter_mut()
            .find(|p| p.user_id == user_id && p.category == input.category)
        {
            row.is_enabled = c.is_enabled;
            row.methods = c.methods.clone();
            row.quiet_hours_start = c.quiet_hours_start;
            row.quiet_hours_end = c.quiet_hours_end;
            row.frequency = c.frequency.clone();
            row.override_quiet_hours = c.override_quiet_hours;
            row.updated_at = now;
            return Ok(row.clone());
        }
        let row = NotificationPreference {
            id: t.next_id(),
            user_id,
            category: input.category.clone(),
            is_enabled: c.is_enabled,
            methods: c.methods.clone(),
            quiet_hours_start: c.quiet_hours_start,
            quiet_hours_end: c.quiet_hours_end,
            frequency: c.frequency.clone(),
            override_quiet_hours: c.override_quiet_hours,
            created_at: now,
            updated_at: now,
        };
        t.preferences.push(row.clone());
        Ok(row)
    }

    async fn delete_preferences(&self, user_id: DbId) -> StoreResult<u64> {
        let mut t = self.lock();
        let before = t.preferences.len();
        t.preferences.retain(|p| p.user_id != user_id);
        Ok((before - t.preferences.len()) as u64)
    }

    async fn get_default(&self, category: &str) -> StoreResult<Option<PreferenceDefault>> {
        Ok(self
            .lock()
            .defaults
            .iter()
            .find(|d| d.category == category)
            .cloned())
    }

    async fn list_defaults(&self) -> StoreResult<Vec<PreferenceDefault>> {
        let mut rows = self.lock().defaults.clone();
        rows.sort_by(|a, b| a.category.cmp(&b.category));
        Ok(rows)
    }

    async fn upsert_default(
        &self,
        category: &str,
        config: &PreferenceConfig,
    ) -> StoreResult<PreferenceDefault> {
        let mut t = self.lock();
        let now = Utc::now();
        if let Some(row) = t.defaults.iter_mut().find(|d| d.category == category) {
            row.is_enabled = config.is_enabled;
            row.methods = config.methods.clone();
            row.quiet_hours_start = config.quiet_hours_start;
            row.quiet_hours_end = config.quiet_hours_end;
            row.frequency = config.frequency.clone();
            row.override_quiet_hours = config.override_quiet_hours;
            row.updated_at = now;
            return Ok(row.clone());
        }
        let row = PreferenceDefault {
            id: t.next_id(),
            category: category.to_string(),
            is_enabled: config.is_enabled,
            methods: config.methods.clone(),
            quiet_hours_start: config.quiet_hours_start,
            quiet_hours_end: config.quiet_hours_end,
            frequency: config.frequency.clone(),
            override_quiet_hours: config.override_quiet_hours,
            created_at: now,
            updated_at: now,
        };
        t.defaults.push(row.clone());
        Ok(row)
    }
}

// ---------------------------------------------------------------------------
// Device tokens
// ---------------------------------------------------------------------------

#[async_trait]
impl DeviceTokenStore for MemoryStore {
    async fn upsert_device_token(&self, input: &RegisterDeviceToken) -> StoreResult<DeviceToken> {
        let mut t = self.lock();
        let now = Utc::now();
        if let Some(row) = t.device_tokens.iter_mut().find(|d| d.token == input.token) {
            row.user_id = input.user_id;
            row.platform = input.platform.clone();
            row.device_name = input.device_name.clone();
            row.is_active = true;
            row.updated_at = now;
            return Ok(row.clone());
        }
        let row = DeviceToken {
            id: t.next_id(),
            user_id: input.user_id,
            platform: input.platform.clone(),
            token: input.token.clone(),
            device_name: input.device_name.clone(),
            is_active: true,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };
        t.device_tokens.push(row.clone());
        Ok(row)
    }

    async fn find_device_token(&self, token: &str) -> StoreResult<Option<DeviceToken>> {
        Ok(self
            .lock()
            .device_tokens
            .iter()
            .find(|d| d.token == token)
            .cloned())
    }

    async fn deactivate_device_token(&self, user_id: DbId, token: &str) -> StoreResult<bool> {
        let mut t = self.lock();
        match t
            .device_tokens
            .iter_mut()
            .find(|d| d.user_id == user_id && d.token == token && d.is_active)
        {
            Some(row) => {
                row.is_active = false;
                row.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deactivate_tokens(&self, tokens: &[String]) -> StoreResult<u64> {
        let mut t = self.lock();
        let now = Utc::now();
        let mut changed = 0;
        for row in t
            .device_tokens
            .iter_mut()
            .filter(|d| d.is_active && tokens.contains(&d.token))
        {
            row.is_active = false;
            row.updated_at = now;
            changed += 1;
        }
        Ok(changed)
    }

    async fn list_device_tokens(
        &self,
        user_id: DbId,
        platform: Option<Platform>,
        active_only: bool,
    ) -> StoreResult<Vec<DeviceToken>> {
        Ok(self
            .lock()
            .device_tokens
            .iter()
            .rev()
            .filter(|d| d.user_id == user_id)
            .filter(|d| platform.map_or(true, |p| d.platform == p.as_str()))
            .filter(|d| !active_only || d.is_active)
            .cloned()
            .collect())
    }

    async fn delete_inactive_tokens(&self, cutoff: Timestamp) -> StoreResult<u64> {
        let mut t = self.lock();
        let before = t.device_tokens.len();
        t.device_tokens
            .retain(|d| d.is_active || d.updated_at >= cutoff);
        Ok((before - t.device_tokens.len()) as u64)
    }

    async fn touch_device_tokens(&self, tokens: &[String]) -> StoreResult<u64> {
        let mut t = self.lock();
        let now = Utc::now();
        let mut changed = 0;
        for row in t
            .device_tokens
            .iter_mut()
            .filter(|d| tokens.contains(&d.token))
        {
            row.last_used_at = Some(now);
            changed += 1;
        }
        Ok(changed)
    }
}

// ---------------------------------------------------------------------------
// Analytics
// ---------------------------------------------------------------------------

#[async_trait]
impl AnalyticsStore for MemoryStore {
    async fn get_analytics(&self, key: &AttemptKey) -> StoreResult<Option<DeliveryAnalytics>> {
        Ok(self
            .lock()
            .analytics
            .iter()
            .find(|a| {
                a.notification_id == key.notification_id
                    && a.user_id == key.user_id
                    && a.method == key.method.as_str()
            })
            .cloned())
    }

    async fn insert_analytics(
        &self,
        input: &NewDeliveryAnalytics,
    ) -> StoreResult<DeliveryAnalytics> {
        let mut t = self.lock();
        let key = &input.key;
        let exists = t.analytics.iter().any(|a| {
            a.notification_id == key.notification_id
                && a.user_id == key.user_id
                && a.method == key.method.as_str()
        });
        if exists {
            return Err(StoreError::Conflict(format!(
                "Delivery record already exists for notification {} via {}",
                key.notification_id, key.method
            )));
        }
        let now = Utc::now();
        let mut row = DeliveryAnalytics {
            id: t.next_id(),
            notification_id: key.notification_id,
            user_id: key.user_id,
            method: key.method.as_str().to_string(),
            category: input.category.clone(),
            status: String::new(),
            sent_at: None,
            delivered_at: None,
            read_at: None,
            clicked_at: None,
            failed_at: None,
            time_to_deliver_ms: None,
            time_to_read_ms: None,
            time_to_click_ms: None,
            failure_reason: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        };
        row.set_funnel_state(&input.state);
        t.analytics.push(row.clone());
        Ok(row)
    }

    async fn update_analytics(
        &self,
        current: &DeliveryAnalytics,
        state: &FunnelState,
    ) -> StoreResult<bool> {
        let mut t = self.lock();
        match t.analytics.iter_mut().find(|a| {
            a.id == current.id && a.status == current.status && a.retry_count == current.retry_count
        }) {
            Some(row) => {
                row.set_funnel_state(state);
                row.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_analytics(
        &self,
        filter: &AnalyticsFilter,
    ) -> StoreResult<Vec<DeliveryAnalytics>> {
        Ok(self
            .lock()
            .analytics
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Digests and users
// ---------------------------------------------------------------------------

#[async_trait]
impl DigestStore for MemoryStore {
    async fn enqueue_digest(&self, input: &NewDigestEntry) -> StoreResult<DigestEntry> {
        let mut t = self.lock();
        let row = DigestEntry {
            id: t.next_id(),
            user_id: input.user_id,
            notification_id: input.notification_id,
            method: input.method.clone(),
            frequency: input.frequency.clone(),
            created_at: Utc::now(),
            compiled_at: None,
        };
        t.digests.push(row.clone());
        Ok(row)
    }

    async fn list_pending_digests(&self, frequency: &str) -> StoreResult<Vec<DigestEntry>> {
        let mut rows: Vec<_> = self
            .lock()
            .digests
            .iter()
            .filter(|d| d.frequency == frequency && d.compiled_at.is_none())
            .cloned()
            .collect();
        rows.sort_by_key(|d| (d.user_id, d.created_at, d.id));
        Ok(rows)
    }

    async fn mark_digests_compiled(&self, ids: &[DbId]) -> StoreResult<u64> {
        let mut t = self.lock();
        let now = Utc::now();
        let mut changed = 0;
        for row in t
            .digests
            .iter_mut()
            .filter(|d| d.compiled_at.is_none() && ids.contains(&d.id))
        {
            row.compiled_at = Some(now);
            changed += 1;
        }
        Ok(changed)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_recipient(&self, user_id: DbId) -> StoreResult<Option<Recipient>> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|u| u.user_id == user_id)
            .cloned())
    }
}

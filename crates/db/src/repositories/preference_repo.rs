//! Repository for the `notification_preferences` and
//! `notification_preference_defaults` tables.

use herald_core::types::DbId;
use sqlx::PgPool;

use crate::models::preference::{
    NotificationPreference, PreferenceConfig, PreferenceDefault, UpdatePreference,
};

/// Column list for `notification_preferences` queries.
const PREF_COLUMNS: &str = "id, user_id, category, is_enabled, methods, quiet_hours_start, \
    quiet_hours_end, frequency, override_quiet_hours, created_at, updated_at";

/// Column list for `notification_preference_defaults` queries.
const DEFAULT_COLUMNS: &str = "id, category, is_enabled, methods, quiet_hours_start, \
    quiet_hours_end, frequency, override_quiet_hours, created_at, updated_at";

/// Provides CRUD operations for notification preferences and category defaults.
pub struct NotificationPreferenceRepo;

impl NotificationPreferenceRepo {
    /// List all explicit preferences of a user.
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Vec<NotificationPreference>, sqlx::Error> {
        let query = format!(
            "SELECT {PREF_COLUMNS} FROM notification_preferences \
             WHERE user_id = $1 \
             ORDER BY category"
        );
        sqlx::query_as::<_, NotificationPreference>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// Get the explicit preference of a user for one category.
    pub async fn get_for_category(
        pool: &PgPool,
        user_id: DbId,
        category: &str,
    ) -> Result<Option<NotificationPreference>, sqlx::Error> {
        let query = format!(
            "SELECT {PREF_COLUMNS} FROM notification_preferences \
             WHERE user_id = $1 AND category = $2"
        );
        sqlx::query_as::<_, NotificationPreference>(&query)
            .bind(user_id)
            .bind(category)
            .fetch_optional(pool)
            .await
    }

    /// Insert or replace a user's preference for one category.
    ///
    /// Uses `INSERT ... ON CONFLICT (user_id, category) DO UPDATE` to
    /// upsert in a single round-trip.
    pub async fn upsert(
        pool: &PgPool,
        user_id: DbId,
        input: &UpdatePreference,
    ) -> Result<NotificationPreference, sqlx::Error> {
        let query = format!(
            "INSERT INTO notification_preferences \
                (user_id, category, is_enabled, methods, quiet_hours_start, quiet_hours_end, \
                 frequency, override_quiet_hours) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (user_id, category) DO UPDATE SET \
                is_enabled = EXCLUDED.is_enabled, \
                methods = EXCLUDED.methods, \
                quiet_hours_start = EXCLUDED.quiet_hours_start, \
                quiet_hours_end = EXCLUDED.quiet_hours_end, \
                frequency = EXCLUDED.frequency, \
                override_quiet_hours = EXCLUDED.override_quiet_hours, \
                updated_at = NOW() \
             RETURNING {PREF_COLUMNS}"
        );
        let config = &input.config;
        sqlx::query_as::<_, NotificationPreference>(&query)
            .bind(user_id)
            .bind(&input.category)
            .bind(config.is_enabled)
            .bind(&config.methods)
            .bind(config.quiet_hours_start)
            .bind(config.quiet_hours_end)
            .bind(&config.frequency)
            .bind(config.override_quiet_hours)
            .fetch_one(pool)
            .await
    }

    /// Delete every explicit preference of a user, reverting to defaults.
    pub async fn delete_for_user(pool: &PgPool, user_id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM notification_preferences WHERE user_id = $1")
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Get the admin-managed default for one category.
    pub async fn get_default(
        pool: &PgPool,
        category: &str,
    ) -> Result<Option<PreferenceDefault>, sqlx::Error> {
        let query = format!(
            "SELECT {DEFAULT_COLUMNS} FROM notification_preference_defaults WHERE category = $1"
        );
        sqlx::query_as::<_, PreferenceDefault>(&query)
            .bind(category)
            .fetch_optional(pool)
            .await
    }

    /// List every category default.
    pub async fn list_defaults(pool: &PgPool) -> Result<Vec<PreferenceDefault>, sqlx::Error> {
        let query = format!(
            "SELECT {DEFAULT_COLUMNS} FROM notification_preference_defaults ORDER BY category"
        );
        sqlx::query_as::<_, PreferenceDefault>(&query)
            .fetch_all(pool)
            .await
    }

    /// Insert or replace the default for one category.
    pub async fn upsert_default(
        pool: &PgPool,
        category: &str,
        config: &PreferenceConfig,
    ) -> Result<PreferenceDefault, sqlx::Error> {
        let query = format!(
            "INSERT INTO notification_preference_defaults \
                (category, is_enabled, methods, quiet_hours_start, quiet_hours_end, \
                 frequency, override_quiet_hours) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (category) DO UPDATE SET \
                is_enabled = EXCLUDED.is_enabled, \
                methods = EXCLUDED.methods, \
                quiet_hours_start = EXCLUDED.quiet_hours_start, \
                quiet_hours_end = EXCLUDED.quiet_hours_end, \
                frequency = EXCLUDED.frequency, \
                override_quiet_hours = EXCLUDED.override_quiet_hours, \
                updated_at = NOW() \
             RETURNING {DEFAULT_COLUMNS}"
        );
        sqlx::query_as::<_, PreferenceDefault>(&query)
            .bind(category)
            .bind(config.is_enabled)
            .bind(&config.methods)
            .bind(config.quiet_hours_start)
            .bind(config.quiet_hours_end)
            .bind(&config.frequency)
            .bind(config.override_quiet_hours)
            .fetch_one(pool)
            .await
    }
}

//! Repository for the `device_tokens` table.

use herald_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::device_token::{DeviceToken, RegisterDeviceToken};

/// Column list for `device_tokens` queries.
const COLUMNS: &str =
    "id, user_id, platform, token, device_name, is_active, last_used_at, created_at, updated_at";

/// Provides CRUD operations for push device tokens.
pub struct DeviceTokenRepo;

impl DeviceTokenRepo {
    /// Register a token, or re-register it for a (possibly different) user.
    ///
    /// A token is unique across all users: registering a known token moves it
    /// to `input.user_id`, replaces its platform and device name, and
    /// reactivates it.
    pub async fn upsert(
        pool: &PgPool,
        input: &RegisterDeviceToken,
    ) -> Result<DeviceToken, sqlx::Error> {
        let query = format!(
            "INSERT INTO device_tokens (user_id, platform, token, device_name) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (token) DO UPDATE SET \
                user_id = EXCLUDED.user_id, \
                platform = EXCLUDED.platform, \
                device_name = EXCLUDED.device_name, \
                is_active = true, \
                updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DeviceToken>(&query)
            .bind(input.user_id)
            .bind(&input.platform)
            .bind(&input.token)
            .bind(&input.device_name)
            .fetch_one(pool)
            .await
    }

    /// Find a token row by its token string.
    pub async fn find_by_token(
        pool: &PgPool,
        token: &str,
    ) -> Result<Option<DeviceToken>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM device_tokens WHERE token = $1");
        sqlx::query_as::<_, DeviceToken>(&query)
            .bind(token)
            .fetch_optional(pool)
            .await
    }

    /// List a user's tokens, optionally restricted to one platform and to
    /// active tokens. Newest registrations first.
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: DbId,
        platform: Option<&str>,
        active_only: bool,
    ) -> Result<Vec<DeviceToken>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM device_tokens \
             WHERE user_id = $1 \
               AND ($2::TEXT IS NULL OR platform = $2) \
               AND (NOT $3 OR is_active = true) \
             ORDER BY created_at DESC, id DESC"
        );
        sqlx::query_as::<_, DeviceToken>(&query)
            .bind(user_id)
            .bind(platform)
            .bind(active_only)
            .fetch_all(pool)
            .await
    }

    /// Deactivate one token owned by `user_id`.
    ///
    /// Returns `true` if a row changed.
    pub async fn deactivate_for_user(
        pool: &PgPool,
        user_id: DbId,
        token: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE device_tokens SET is_active = false, updated_at = NOW() \
             WHERE user_id = $1 AND token = $2 AND is_active = true",
        )
        .bind(user_id)
        .bind(token)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deactivate tokens a push provider reported as invalid.
    pub async fn deactivate_many(pool: &PgPool, tokens: &[String]) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE device_tokens SET is_active = false, updated_at = NOW() \
             WHERE token = ANY($1) AND is_active = true",
        )
        .bind(tokens)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Record a successful push to these tokens.
    pub async fn touch_many(pool: &PgPool, tokens: &[String]) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE device_tokens SET last_used_at = NOW() WHERE token = ANY($1)")
            .bind(tokens)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete inactive tokens last updated before `cutoff`.
    pub async fn delete_inactive_before(
        pool: &PgPool,
        cutoff: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM device_tokens WHERE is_active = false AND updated_at < $1",
        )
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

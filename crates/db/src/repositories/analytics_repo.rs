//! Repository for the `delivery_analytics` table.

use herald_core::funnel::FunnelState;
use sqlx::PgPool;

use crate::models::analytics::{
    AnalyticsFilter, AttemptKey, DeliveryAnalytics, NewDeliveryAnalytics,
};

/// Column list for `delivery_analytics` queries.
const COLUMNS: &str = "id, notification_id, user_id, method, category, status, \
    sent_at, delivered_at, read_at, clicked_at, failed_at, \
    time_to_deliver_ms, time_to_read_ms, time_to_click_ms, \
    failure_reason, retry_count, created_at, updated_at";

/// Persistence for delivery funnel records.
pub struct DeliveryAnalyticsRepo;

impl DeliveryAnalyticsRepo {
    /// Fetch the record of one dispatch attempt.
    pub async fn find(
        pool: &PgPool,
        key: &AttemptKey,
    ) -> Result<Option<DeliveryAnalytics>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM delivery_analytics \
             WHERE notification_id = $1 AND user_id = $2 AND method = $3"
        );
        sqlx::query_as::<_, DeliveryAnalytics>(&query)
            .bind(key.notification_id)
            .bind(key.user_id)
            .bind(key.method.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Insert the first record of an attempt.
    ///
    /// Fails with a unique violation if the attempt already has a record.
    pub async fn insert(
        pool: &PgPool,
        input: &NewDeliveryAnalytics,
    ) -> Result<DeliveryAnalytics, sqlx::Error> {
        let query = format!(
            "INSERT INTO delivery_analytics \
                (notification_id, user_id, method, category, status, sent_at, failed_at, \
                 failure_reason, retry_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        let state = &input.state;
        sqlx::query_as::<_, DeliveryAnalytics>(&query)
            .bind(input.key.notification_id)
            .bind(input.key.user_id)
            .bind(input.key.method.as_str())
            .bind(&input.category)
            .bind(state.status.as_str())
            .bind(state.sent_at)
            .bind(state.failed_at)
            .bind(&state.failure_reason)
            .bind(state.retry_count)
            .fetch_one(pool)
            .await
    }

    /// Overwrite the funnel columns of `current`, but only if its status and
    /// retry count are still the ones that were read.
    ///
    /// Returns `false` when another writer changed the record first.
    pub async fn compare_and_update(
        pool: &PgPool,
        current: &DeliveryAnalytics,
        state: &FunnelState,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE delivery_analytics SET \
                status = $3, sent_at = $4, delivered_at = $5, read_at = $6, \
                clicked_at = $7, failed_at = $8, time_to_deliver_ms = $9, \
                time_to_read_ms = $10, time_to_click_ms = $11, failure_reason = $12, \
                retry_count = $13, updated_at = NOW() \
             WHERE id = $1 AND status = $2 AND retry_count = $14",
        )
        .bind(current.id)
        .bind(&current.status)
        .bind(state.status.as_str())
        .bind(state.sent_at)
        .bind(state.delivered_at)
        .bind(state.read_at)
        .bind(state.clicked_at)
        .bind(state.failed_at)
        .bind(state.time_to_deliver_ms)
        .bind(state.time_to_read_ms)
        .bind(state.time_to_click_ms)
        .bind(&state.failure_reason)
        .bind(state.retry_count)
        .bind(current.retry_count)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List records matching `filter`, oldest first.
    pub async fn list(
        pool: &PgPool,
        filter: &AnalyticsFilter,
    ) -> Result<Vec<DeliveryAnalytics>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM delivery_analytics \
             WHERE ($1::BIGINT IS NULL OR user_id = $1) \
               AND ($2::TEXT IS NULL OR category = $2) \
               AND ($3::TEXT IS NULL OR method = $3) \
               AND ($4::TIMESTAMPTZ IS NULL OR created_at >= $4) \
             ORDER BY created_at, id"
        );
        sqlx::query_as::<_, DeliveryAnalytics>(&query)
            .bind(filter.user_id)
            .bind(filter.category.as_deref())
            .bind(filter.method.map(|m| m.as_str()))
            .bind(filter.since)
            .fetch_all(pool)
            .await
    }
}

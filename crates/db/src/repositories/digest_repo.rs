//! Repository for the `digest_entries` table.

use herald_core::types::DbId;
use sqlx::PgPool;

use crate::models::digest::{DigestEntry, NewDigestEntry};

/// Column list for `digest_entries` queries.
const COLUMNS: &str =
    "id, user_id, notification_id, method, frequency, created_at, compiled_at";

pub struct DigestRepo;

impl DigestRepo {
    pub async fn create(pool: &PgPool, input: &NewDigestEntry) -> Result<DigestEntry, sqlx::Error> {
        let query = format!(
            "INSERT INTO digest_entries (user_id, notification_id, method, frequency) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DigestEntry>(&query)
            .bind(input.user_id)
            .bind(input.notification_id)
            .bind(&input.method)
            .bind(&input.frequency)
            .fetch_one(pool)
            .await
    }

    /// Entries not yet compiled into a digest, grouped by user then age.
    pub async fn list_pending(
        pool: &PgPool,
        frequency: &str,
    ) -> Result<Vec<DigestEntry>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM digest_entries \
             WHERE frequency = $1 AND compiled_at IS NULL \
             ORDER BY user_id, created_at, id"
        );
        sqlx::query_as::<_, DigestEntry>(&query)
            .bind(frequency)
            .fetch_all(pool)
            .await
    }

    pub async fn mark_compiled(pool: &PgPool, ids: &[DbId]) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE digest_entries SET compiled_at = NOW() \
             WHERE id = ANY($1) AND compiled_at IS NULL",
        )
        .bind(ids)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

//! Read-only access to the `users` table.

use herald_core::types::DbId;
use sqlx::PgPool;

use crate::models::recipient::Recipient;

pub struct UserRepo;

impl UserRepo {
    /// Addressing information for one user.
    pub async fn find_recipient(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Option<Recipient>, sqlx::Error> {
        sqlx::query_as::<_, Recipient>(
            "SELECT id AS user_id, email, display_name FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }
}

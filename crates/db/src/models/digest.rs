//! Digest queue entries.

use herald_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `digest_entries` table: one notification held back for a
/// daily or weekly digest over one delivery method.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct DigestEntry {
    pub id: DbId,
    pub user_id: DbId,
    pub notification_id: DbId,
    pub method: String,
    pub frequency: String,
    pub created_at: Timestamp,
    pub compiled_at: Option<Timestamp>,
}

/// DTO for queueing a digest entry.
#[derive(Debug, Clone)]
pub struct NewDigestEntry {
    pub user_id: DbId,
    pub notification_id: DbId,
    pub method: String,
    pub frequency: String,
}

//! Push device token model and DTOs.

use herald_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `device_tokens` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct DeviceToken {
    pub id: DbId,
    pub user_id: DbId,
    pub platform: String,
    pub token: String,
    pub device_name: Option<String>,
    pub is_active: bool,
    pub last_used_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for registering (or re-registering) a device token.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterDeviceToken {
    pub user_id: DbId,
    pub token: String,
    pub platform: String,
    pub device_name: Option<String>,
}

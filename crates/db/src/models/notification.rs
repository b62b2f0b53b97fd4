//! Notification entity model and DTOs.

use herald_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `notifications` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Notification {
    pub id: DbId,
    pub user_id: DbId,
    pub category: String,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub icon: Option<String>,
    pub data: serde_json::Value,
    pub is_read: bool,
    pub read_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

/// DTO for creating a notification.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateNotification {
    pub user_id: DbId,
    pub category: String,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub icon: Option<String>,
    pub data: Option<serde_json::Value>,
}

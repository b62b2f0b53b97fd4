//! Addressing information for a user, read from the `users` table.

use herald_core::types::DbId;
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Recipient {
    pub user_id: DbId,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl Recipient {
    /// A recipient with no directory entry; only live delivery can reach it.
    pub fn unknown(user_id: DbId) -> Self {
        Self {
            user_id,
            email: None,
            display_name: None,
        }
    }

    /// Name to greet the user with in templates.
    pub fn greeting_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or("there")
    }
}

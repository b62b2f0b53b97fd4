//! Store error type.

use herald_core::error::CoreError;
use herald_core::types::DbId;

/// Error returned by every entity-store operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The addressed row does not exist (or belongs to another user).
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    /// A unique constraint would be violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored value could not be interpreted.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Map a PostgreSQL unique-violation (SQLSTATE 23505) to [`StoreError::Conflict`].
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                return StoreError::Conflict(format!(
                    "Duplicate value violates unique constraint: {constraint}"
                ));
            }
        }
        StoreError::Database(err)
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => CoreError::NotFound { entity, id },
            StoreError::Conflict(msg) => CoreError::Conflict(msg),
            StoreError::Database(e) => CoreError::Internal(format!("Database error: {e}")),
            StoreError::Corrupt(msg) => CoreError::Internal(msg),
        }
    }
}

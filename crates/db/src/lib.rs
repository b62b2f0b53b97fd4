//! Herald persistence layer.
//!
//! - [`models`]: row types and input DTOs.
//! - [`store`]: the entity-store traits the delivery services depend on,
//!   plus [`PgStore`], the PostgreSQL implementation built on
//!   [`repositories`].
//! - [`memory`]: [`MemoryStore`], an in-process implementation for tests
//!   and for running without a database.

pub mod error;
pub mod memory;
pub mod models;
pub mod repositories;
pub mod store;

use sqlx::postgres::PgPoolOptions;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use store::{
    AnalyticsStore, DeviceTokenStore, DigestStore, EntityStore, NotificationStore, PgStore,
    PreferenceStore, SharedStore, UserDirectory,
};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify connectivity.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await?;
    Ok(())
}

/// Apply pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

//! PostgreSQL repositories, one per table.
//!
//! Each repository is a unit struct exposing async associated functions that
//! take a `&PgPool`, so callers never hold a repository instance.

mod analytics_repo;
mod device_token_repo;
mod digest_repo;
mod notification_repo;
mod preference_repo;
mod user_repo;

pub use analytics_repo::DeliveryAnalyticsRepo;
pub use device_token_repo::DeviceTokenRepo;
pub use digest_repo::DigestRepo;
pub use notification_repo::NotificationRepo;
pub use preference_repo::NotificationPreferenceRepo;
pub use user_repo::UserRepo;

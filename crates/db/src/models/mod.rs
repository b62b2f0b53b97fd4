//! Row types and DTOs for the delivery core's tables.

pub mod analytics;
pub mod device_token;
pub mod digest;
pub mod notification;
pub mod preference;
pub mod recipient;

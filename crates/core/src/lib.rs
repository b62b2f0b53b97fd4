//! Herald domain core.
//!
//! Pure domain logic shared by the store, the delivery services and the API
//! binary. This crate has no internal dependencies and performs no I/O.

pub mod categories;
pub mod channels;
pub mod error;
pub mod funnel;
pub mod metrics;
pub mod policy;
pub mod types;

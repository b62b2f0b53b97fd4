//! Herald HTTP/WebSocket service.
//!
//! The library half holds everything the binary wires together so that
//! integration tests can build the same application: configuration,
//! [`state::AppState`], the router and middleware stack, the WebSocket
//! transport and background jobs.

pub mod app;
pub mod background;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

//! WebSocket transport for the connection registry.
//!
//! Provides the HTTP upgrade handler, the inbound client actions it accepts,
//! and the heartbeat task that pings every live connection.

mod actions;
mod handler;
mod heartbeat;

pub use actions::{handle_text, AckEvent, ClientAction};
pub use handler::{ws_handler, WsParams};
pub use heartbeat::start_heartbeat;

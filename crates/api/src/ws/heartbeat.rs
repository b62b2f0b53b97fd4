use std::sync::Arc;
use std::time::Duration;

use herald_events::ConnectionRegistry;

/// Spawn a background task that sends periodic Ping frames to all connected
/// WebSocket clients.
///
/// The task runs until aborted through the returned `JoinHandle`, which the
/// binary does during shutdown.
pub fn start_heartbeat(
    registry: Arc<ConnectionRegistry>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);

        loop {
            interval.tick().await;
            let count = registry.active_connection_count();
            tracing::debug!(count, "WebSocket heartbeat ping");
            registry.ping_all();
        }
    })
}

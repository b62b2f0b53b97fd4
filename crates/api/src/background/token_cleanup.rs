//! Periodic removal of deactivated device tokens.
//!
//! Tokens are deactivated when a user unregisters them or when the push
//! gateway reports them invalid. This job hard-deletes those rows once they
//! are older than the configured retention period.

use std::sync::Arc;
use std::time::Duration;

use herald_events::PushAdapter;
use tokio_util::sync::CancellationToken;

/// How often the cleanup job runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(6 * 3600);

/// Run the token cleanup loop until `cancel` is triggered.
pub async fn run(push: Arc<PushAdapter>, retention_days: u32, cancel: CancellationToken) {
    tracing::info!(
        retention_days,
        interval_secs = CLEANUP_INTERVAL.as_secs(),
        "Device token cleanup job started"
    );

    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Device token cleanup job stopping");
                break;
            }
            _ = interval.tick() => {
                match push.cleanup_inactive_tokens(retention_days).await {
                    Ok(0) => tracing::debug!("Device token cleanup: nothing to purge"),
                    Ok(deleted) => tracing::info!(deleted, "Device token cleanup: purged inactive tokens"),
                    Err(e) => tracing::error!(error = %e, "Device token cleanup failed"),
                }
            }
        }
    }
}

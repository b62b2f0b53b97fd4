//! Delivery funnel tracking.
//!
//! [`DeliveryFunnelTracker`] persists one analytics record per
//! (notification, user, method) attempt and moves it through the funnel
//! state machine in [`herald_core::funnel`]. Tracking calls never fail: the
//! result is a [`TrackOutcome`] the caller may inspect or ignore.
//!
//! Updates are compare-and-set on the stored status, so two concurrent
//! acknowledgements cannot both apply against the same snapshot. A lost race
//! is retried once against the fresh row.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use herald_core::channels::DeliveryMethod;
use herald_core::error::CoreError;
use herald_core::funnel::{FunnelEvent, FunnelState, InvalidTransition, Transition};
use herald_core::metrics::{compute_metrics, group_metrics, timeline, FunnelMetrics, TimelineBucket, TimelineInterval};
use herald_core::types::DbId;
use herald_db::models::analytics::{AnalyticsFilter, AttemptKey, DeliveryAnalytics, NewDeliveryAnalytics};
use herald_db::{SharedStore, StoreError};
use serde::Deserialize;

/// Default aggregation window.
pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// Attempts made against the store before giving up on a contended record.
const MAX_WRITE_ATTEMPTS: usize = 2;

// ---------------------------------------------------------------------------
// TrackOutcome
// ---------------------------------------------------------------------------

/// Result of a tracking call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    /// The record was created or advanced.
    Applied,
    /// The event had already been recorded; nothing changed.
    Unchanged,
    /// No record exists for the attempt.
    NotFound,
    /// The event would move the record backwards or skip a step.
    InvalidTransition(InvalidTransition),
    /// The store failed or the record was too contended to update.
    StoreError(String),
}

impl TrackOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TrackOutcome::Applied | TrackOutcome::Unchanged)
    }
}

// ---------------------------------------------------------------------------
// MetricsFilter
// ---------------------------------------------------------------------------

/// Which records an aggregation covers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetricsFilter {
    #[serde(default)]
    pub user_id: Option<DbId>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub method: Option<DeliveryMethod>,
    /// Only records created within this many days.
    #[serde(default = "default_window_days")]
    pub window_days: u32,
}

fn default_window_days() -> u32 {
    DEFAULT_WINDOW_DAYS
}

impl Default for MetricsFilter {
    fn default() -> Self {
        Self {
            user_id: None,
            category: None,
            method: None,
            window_days: DEFAULT_WINDOW_DAYS,
        }
    }
}

impl MetricsFilter {
    fn to_store_filter(&self) -> AnalyticsFilter {
        AnalyticsFilter {
            user_id: self.user_id,
            category: self.category.clone(),
            method: self.method,
            since: Some(Utc::now() - Duration::days(i64::from(self.window_days))),
        }
    }
}

// ---------------------------------------------------------------------------
// DeliveryFunnelTracker
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct DeliveryFunnelTracker {
    store: SharedStore,
}

impl DeliveryFunnelTracker {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Record that an attempt was handed to its channel. Creates the record
    /// if needed; on a failed record this is a retry.
    pub async fn track_sent(&self, key: AttemptKey, category: &str) -> TrackOutcome {
        self.track(key, Some(category), FunnelEvent::Sent).await
    }

    pub async fn track_delivered(&self, key: AttemptKey) -> TrackOutcome {
        self.track(key, None, FunnelEvent::Delivered).await
    }

    pub async fn track_read(&self, key: AttemptKey) -> TrackOutcome {
        self.track(key, None, FunnelEvent::Read).await
    }

    pub async fn track_clicked(&self, key: AttemptKey) -> TrackOutcome {
        self.track(key, None, FunnelEvent::Clicked).await
    }

    /// Record a failure. Creates a failed record when the attempt never got
    /// as far as being sent (suppression, full queue, ...).
    pub async fn track_failed(
        &self,
        key: AttemptKey,
        category: &str,
        reason: impl Into<String>,
    ) -> TrackOutcome {
        let event = FunnelEvent::Failed {
            reason: reason.into(),
        };
        self.track(key, Some(category), event).await
    }

    /// Apply `event` to the attempt's record. `category` is only needed when
    /// the event may create the record.
    async fn track(&self, key: AttemptKey, category: Option<&str>, event: FunnelEvent) -> TrackOutcome {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let now = Utc::now();
            let existing = match self.store.get_analytics(&key).await {
                Ok(row) => row,
                Err(e) => return store_failure(&key, &event, e),
            };

            let Some(row) = existing else {
                let (Some(category), Some(state)) = (category, initial_state(&event, now)) else {
                    tracing::debug!(
                        notification_id = key.notification_id,
                        method = %key.method,
                        event = event.name(),
                        "No delivery record to update"
                    );
                    return TrackOutcome::NotFound;
                };
                let input = NewDeliveryAnalytics {
                    key,
                    category: category.to_string(),
                    state,
                };
                match self.store.insert_analytics(&input).await {
                    Ok(_) => return TrackOutcome::Applied,
                    // Someone else created it first; apply against theirs.
                    Err(StoreError::Conflict(_)) => continue,
                    Err(e) => return store_failure(&key, &event, e),
                }
            };

            let mut state = match row.funnel_state() {
                Ok(state) => state,
                Err(e) => return TrackOutcome::StoreError(e.to_string()),
            };
            match state.apply(&event, now) {
                Ok(Transition::Unchanged) => return TrackOutcome::Unchanged,
                Ok(Transition::Applied) => {}
                Err(e) => {
                    tracing::warn!(
                        notification_id = key.notification_id,
                        user_id = key.user_id,
                        method = %key.method,
                        error = %e,
                        "Rejected funnel transition"
                    );
                    return TrackOutcome::InvalidTransition(e);
                }
            }

            match self.store.update_analytics(&row, &state).await {
                Ok(true) => return TrackOutcome::Applied,
                Ok(false) => continue,
                Err(e) => return store_failure(&key, &event, e),
            }
        }

        tracing::warn!(
            notification_id = key.notification_id,
            method = %key.method,
            event = event.name(),
            "Delivery record kept changing underneath the update"
        );
        TrackOutcome::StoreError("concurrent update".to_string())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The stored record of one attempt.
    pub async fn get(&self, key: &AttemptKey) -> Result<Option<DeliveryAnalytics>, CoreError> {
        Ok(self.store.get_analytics(key).await?)
    }

    pub async fn metrics(&self, filter: &MetricsFilter) -> Result<FunnelMetrics, CoreError> {
        let rows = self.load(filter).await?;
        Ok(compute_metrics(rows.iter().map(|(_, state)| state)))
    }

    pub async fn metrics_by_category(
        &self,
        filter: &MetricsFilter,
    ) -> Result<BTreeMap<String, FunnelMetrics>, CoreError> {
        let rows = self.load(filter).await?;
        Ok(group_metrics(&rows, |(row, _)| row.category.clone(), |(_, state)| state))
    }

    pub async fn metrics_by_method(
        &self,
        filter: &MetricsFilter,
    ) -> Result<BTreeMap<String, FunnelMetrics>, CoreError> {
        let rows = self.load(filter).await?;
        Ok(group_metrics(&rows, |(row, _)| row.method.clone(), |(_, state)| state))
    }

    /// Per-bucket metrics, oldest bucket first.
    pub async fn timeline(
        &self,
        filter: &MetricsFilter,
        interval: TimelineInterval,
    ) -> Result<Vec<TimelineBucket>, CoreError> {
        let rows = self.load(filter).await?;
        Ok(timeline(&rows, interval, |(row, _)| row.created_at, |(_, state)| state))
    }

    /// Matching rows with their parsed funnel state. Unreadable rows are
    /// skipped.
    async fn load(&self, filter: &MetricsFilter) -> Result<Vec<(DeliveryAnalytics, FunnelState)>, CoreError> {
        let rows = self.store.list_analytics(&filter.to_store_filter()).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row.funnel_state() {
                Ok(state) => Some((row, state)),
                Err(e) => {
                    tracing::warn!(analytics_id = row.id, error = %e, "Skipping unreadable delivery record");
                    None
                }
            })
            .collect())
    }
}

/// The state a record starts in when `event` is the first thing seen.
fn initial_state(event: &FunnelEvent, at: chrono::DateTime<Utc>) -> Option<FunnelState> {
    match event {
        FunnelEvent::Sent => Some(FunnelState::sent(at)),
        FunnelEvent::Failed { reason } => Some(FunnelState::failed(reason.clone(), at)),
        FunnelEvent::Delivered | FunnelEvent::Read | FunnelEvent::Clicked => None,
    }
}

fn store_failure(key: &AttemptKey, event: &FunnelEvent, err: StoreError) -> TrackOutcome {
    tracing::error!(
        notification_id = key.notification_id,
        method = %key.method,
        event = event.name(),
        error = %err,
        "Failed to record delivery event"
    );
    TrackOutcome::StoreError(err.to_string())
}

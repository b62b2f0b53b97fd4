//! Delivery analytics model, keys and filters.

use herald_core::channels::DeliveryMethod;
use herald_core::error::CoreError;
use herald_core::funnel::FunnelState;
use herald_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `delivery_analytics` table: one dispatch attempt of one
/// notification over one delivery method.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct DeliveryAnalytics {
    pub id: DbId,
    pub notification_id: DbId,
    pub user_id: DbId,
    pub method: String,
    pub category: String,
    pub status: String,
    pub sent_at: Option<Timestamp>,
    pub delivered_at: Option<Timestamp>,
    pub read_at: Option<Timestamp>,
    pub clicked_at: Option<Timestamp>,
    pub failed_at: Option<Timestamp>,
    pub time_to_deliver_ms: Option<i64>,
    pub time_to_read_ms: Option<i64>,
    pub time_to_click_ms: Option<i64>,
    pub failure_reason: Option<String>,
    pub retry_count: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Identity of a dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptKey {
    pub notification_id: DbId,
    pub user_id: DbId,
    pub method: DeliveryMethod,
}

/// DTO for inserting a new attempt.
#[derive(Debug, Clone)]
pub struct NewDeliveryAnalytics {
    pub key: AttemptKey,
    pub category: String,
    pub state: FunnelState,
}

/// Row filter for analytics queries. `None` fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsFilter {
    pub user_id: Option<DbId>,
    pub category: Option<String>,
    pub method: Option<DeliveryMethod>,
    /// Only attempts created at or after this instant.
    pub since: Option<Timestamp>,
}

impl DeliveryAnalytics {
    /// The funnel state stored in this row.
    pub fn funnel_state(&self) -> Result<FunnelState, CoreError> {
        Ok(FunnelState {
            status: self.status.parse()?,
            sent_at: self.sent_at,
            delivered_at: self.delivered_at,
            read_at: self.read_at,
            clicked_at: self.clicked_at,
            failed_at: self.failed_at,
            time_to_deliver_ms: self.time_to_deliver_ms,
            time_to_read_ms: self.time_to_read_ms,
            time_to_click_ms: self.time_to_click_ms,
            failure_reason: self.failure_reason.clone(),
            retry_count: self.retry_count,
        })
    }

    /// Copy `state` into the row's funnel columns.
    pub fn set_funnel_state(&mut self, state: &FunnelState) {
        self.status = state.status.as_str().to_string();
        self.sent_at = state.sent_at;
        self.delivered_at = state.delivered_at;
        self.read_at = state.read_at;
        self.clicked_at = state.clicked_at;
        self.failed_at = state.failed_at;
        self.time_to_deliver_ms = state.time_to_deliver_ms;
        self.time_to_read_ms = state.time_to_read_ms;
        self.time_to_click_ms = state.time_to_click_ms;
        self.failure_reason = state.failure_reason.clone();
        self.retry_count = state.retry_count;
    }

    pub fn key(&self) -> Result<AttemptKey, CoreError> {
        Ok(AttemptKey {
            notification_id: self.notification_id,
            user_id: self.user_id,
            method: self.method.parse()?,
        })
    }
}

impl AnalyticsFilter {
    /// Whether `row` passes this filter.
    pub fn matches(&self, row: &DeliveryAnalytics) -> bool {
        self.user_id.map_or(true, |id| row.user_id == id)
            && self.category.as_deref().map_or(true, |c| row.category == c)
            && self.method.map_or(true, |m| row.method == m.as_str())
            && self.since.map_or(true, |since| row.created_at >= since)
    }
}

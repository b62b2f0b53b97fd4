//! Delivery funnel state machine.
//!
//! Every dispatch attempt of a notification over one delivery method is
//! tracked as a [`FunnelState`]. The status only moves forward:
//!
//! ```text
//! sent -> delivered -> read -> clicked
//!                   \-------> clicked
//! sent | delivered -> failed
//! ```
//!
//! Each timestamp is written at most once. Re-applying an event that has
//! already been applied is an idempotent no-op ([`Transition::Unchanged`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Failure reasons
// ---------------------------------------------------------------------------

/// Attempt suppressed because the user is inside their quiet-hours window.
pub const REASON_QUIET_HOURS: &str = "quiet_hours_suppressed";

/// Attempt suppressed because the user set the category frequency to never.
pub const REASON_OPTED_OUT: &str = "opted_out";

/// In-app attempt while the user had no live connection.
pub const REASON_USER_OFFLINE: &str = "user_offline";

/// The channel adapter did not answer within its timeout.
pub const REASON_TIMEOUT: &str = "timeout";

/// The dispatch queue stayed full for longer than the enqueue timeout.
pub const REASON_QUEUE_FULL: &str = "queue_full";

/// No adapter is registered for the delivery method.
pub const REASON_NO_ADAPTER: &str = "adapter_unavailable";

// ---------------------------------------------------------------------------
// DeliveryStatus
// ---------------------------------------------------------------------------

/// Current position of a dispatch attempt in the funnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
    Clicked,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
            DeliveryStatus::Clicked => "clicked",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "read" => Ok(DeliveryStatus::Read),
            "clicked" => Ok(DeliveryStatus::Clicked),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(CoreError::Validation(format!(
                "Unknown delivery status '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Events and transitions
// ---------------------------------------------------------------------------

/// An acknowledgement or callback that moves an attempt through the funnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunnelEvent {
    Sent,
    Delivered,
    Read,
    Clicked,
    Failed { reason: String },
}

impl FunnelEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FunnelEvent::Sent => "sent",
            FunnelEvent::Delivered => "delivered",
            FunnelEvent::Read => "read",
            FunnelEvent::Clicked => "clicked",
            FunnelEvent::Failed { .. } => "failed",
        }
    }
}

/// Result of applying a valid event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The state changed.
    Applied,
    /// The event had already been applied; nothing changed.
    Unchanged,
}

/// An event that would move the funnel backwards or skip a step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid funnel transition: cannot apply '{event}' to an attempt in state '{from}'")]
pub struct InvalidTransition {
    pub from: DeliveryStatus,
    pub event: &'static str,
}

// ---------------------------------------------------------------------------
// FunnelState
// ---------------------------------------------------------------------------

/// Timestamps, derived latencies and failure bookkeeping of one attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelState {
    pub status: DeliveryStatus,
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
}

impl FunnelState {
    /// A fresh attempt that was handed to its channel at `at`.
    pub fn sent(at: Timestamp) -> Self {
        Self {
            status: DeliveryStatus::Sent,
            sent_at: Some(at),
            delivered_at: None,
            read_at: None,
            clicked_at: None,
            failed_at: None,
            time_to_deliver_ms: None,
            time_to_read_ms: None,
            time_to_click_ms: None,
            failure_reason: None,
            retry_count: 0,
        }
    }

    /// An attempt that failed (or was suppressed) before it was ever sent.
    pub fn failed(reason: impl Into<String>, at: Timestamp) -> Self {
        Self {
            status: DeliveryStatus::Failed,
            sent_at: None,
            failed_at: Some(at),
            failure_reason: Some(reason.into()),
            ..Self::sent(at)
        }
    }

    /// Apply `event` observed at `at`.
    ///
    /// On error the state is left untouched.
    pub fn apply(&mut self, event: &FunnelEvent, at: Timestamp) -> Result<Transition, InvalidTransition> {
        use DeliveryStatus as S;

        let invalid = |from: DeliveryStatus| InvalidTransition {
            from,
            event: event.name(),
        };

        match (event, self.status) {
            // A new send of a failed attempt is a retry.
            (FunnelEvent::Sent, S::Failed) => {
                self.status = S::Sent;
                self.sent_at = Some(at);
                Ok(Transition::Applied)
            }
            (FunnelEvent::Sent, _) => Ok(Transition::Unchanged),

            (FunnelEvent::Delivered, S::Sent) => {
                self.status = S::Delivered;
                self.delivered_at = Some(at);
                self.time_to_deliver_ms = millis_between(self.sent_at, self.delivered_at);
                Ok(Transition::Applied)
            }
            (FunnelEvent::Delivered, S::Delivered | S::Read | S::Clicked) => {
                Ok(Transition::Unchanged)
            }
            (FunnelEvent::Delivered, from @ S::Failed) => Err(invalid(from)),

            (FunnelEvent::Read, S::Delivered) => {
                self.status = S::Read;
                self.read_at = Some(at);
                self.time_to_read_ms = millis_between(self.delivered_at, self.read_at);
                Ok(Transition::Applied)
            }
            (FunnelEvent::Read, S::Read | S::Clicked) => Ok(Transition::Unchanged),
            (FunnelEvent::Read, from @ (S::Sent | S::Failed)) => Err(invalid(from)),

            (FunnelEvent::Clicked, S::Delivered | S::Read) => {
                self.status = S::Clicked;
                self.clicked_at = Some(at);
                self.time_to_click_ms = millis_between(self.delivered_at, self.clicked_at);
                Ok(Transition::Applied)
            }
            (FunnelEvent::Clicked, S::Clicked) => Ok(Transition::Unchanged),
            (FunnelEvent::Clicked, from @ (S::Sent | S::Failed)) => Err(invalid(from)),

            (FunnelEvent::Failed { reason }, S::Sent | S::Delivered) => {
                self.status = S::Failed;
                self.failed_at.get_or_insert(at);
                self.failure_reason = Some(reason.clone());
                Ok(Transition::Applied)
            }
            // Repeated failure of the same attempt.
            (FunnelEvent::Failed { reason }, S::Failed) => {
                self.retry_count += 1;
                self.failure_reason = Some(reason.clone());
                Ok(Transition::Applied)
            }
            (FunnelEvent::Failed { .. }, from @ (S::Read | S::Clicked)) => Err(invalid(from)),
        }
    }

    /// Whether the attempt ever reached its channel.
    pub fn was_sent(&self) -> bool {
        self.sent_at.is_some()
    }

    pub fn was_delivered(&self) -> bool {
        self.delivered_at.is_some()
    }

    pub fn was_read(&self) -> bool {
        self.read_at.is_some()
    }

    pub fn was_clicked(&self) -> bool {
        self.clicked_at.is_some()
    }
}

/// Milliseconds from `from` to `to`, when both are known.
fn millis_between(from: Option<Timestamp>, to: Option<Timestamp>) -> Option<i64> {
    match (from, to) {
        (Some(from), Some(to)) => Some((to - from).num_milliseconds()),
        _ => None,
    }
}

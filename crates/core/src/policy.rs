//! Per-dispatch delivery policy: quiet hours and frequency.
//!
//! [`plan_delivery`] takes the effective settings for a (user, category)
//! pair and classifies each external delivery method into "send now",
//! "hold for digest" or "suppress". In-app delivery is not part of the plan:
//! it always happens.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveTime, Timelike};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::channels::DeliveryMethod;
use crate::error::CoreError;
use crate::funnel::{REASON_OPTED_OUT, REASON_QUIET_HOURS};
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Frequency
// ---------------------------------------------------------------------------

/// How often a category may reach the user over external channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Instant,
    Daily,
    Weekly,
    Never,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Instant => "instant",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Never => "never",
        }
    }

    /// Length of the digest window for digest frequencies.
    pub fn digest_window(&self) -> Option<chrono::Duration> {
        match self {
            Frequency::Daily => Some(chrono::Duration::days(1)),
            Frequency::Weekly => Some(chrono::Duration::days(7)),
            Frequency::Instant | Frequency::Never => None,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instant" => Ok(Frequency::Instant),
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "never" => Ok(Frequency::Never),
            other => Err(CoreError::Validation(format!("Unknown frequency '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// QuietHours
// ---------------------------------------------------------------------------

/// A local time-of-day window `[start, end)`.
///
/// When `end < start` the window wraps past midnight (22:00-08:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, CoreError> {
        if start == end {
            return Err(CoreError::Validation(
                "Quiet hours start and end must differ".to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    /// Build from optional stored bounds. Both or neither must be set.
    pub fn from_bounds(
        start: Option<NaiveTime>,
        end: Option<NaiveTime>,
    ) -> Result<Option<Self>, CoreError> {
        match (start, end) {
            (Some(start), Some(end)) => Self::new(start, end).map(Some),
            (None, None) => Ok(None),
            _ => Err(CoreError::Validation(
                "Quiet hours need both a start and an end".to_string(),
            )),
        }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start < self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

/// Wall-clock time of day of `now` in `tz`, truncated to whole seconds.
pub fn local_time_of_day(now: Timestamp, tz: Tz) -> NaiveTime {
    let local = now.with_timezone(&tz).time();
    local.with_nanosecond(0).unwrap_or(local)
}

// ---------------------------------------------------------------------------
// DeliverySettings
// ---------------------------------------------------------------------------

/// Effective delivery configuration for one (user, category) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliverySettings {
    pub enabled: bool,
    pub methods: Vec<DeliveryMethod>,
    pub quiet_hours: Option<QuietHours>,
    pub frequency: Frequency,
    /// Deliver even inside quiet hours.
    pub override_quiet_hours: bool,
}

impl DeliverySettings {
    /// Applied when neither a user row nor a category default exists.
    pub fn baseline() -> Self {
        Self {
            enabled: true,
            methods: vec![DeliveryMethod::InApp],
            quiet_hours: None,
            frequency: Frequency::Instant,
            override_quiet_hours: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Classification of the external methods for a single dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryPlan {
    /// Send now.
    pub deliver: Vec<DeliveryMethod>,
    /// Hold for the periodic digest.
    pub digest: Vec<(DeliveryMethod, Frequency)>,
    /// Not sent; recorded as failed with the given reason.
    pub suppressed: Vec<(DeliveryMethod, &'static str)>,
}

impl DeliveryPlan {
    pub fn is_empty(&self) -> bool {
        self.deliver.is_empty() && self.digest.is_empty() && self.suppressed.is_empty()
    }
}

/// Decide what happens to each external method of `settings`.
///
/// - Disabled settings produce an empty plan.
/// - `never` suppresses every method with `opted_out`.
/// - `daily`/`weekly` hold every method for the digest.
/// - Inside quiet hours, methods are suppressed with `quiet_hours_suppressed`
///   unless the override flag is set or the category is urgent.
pub fn plan_delivery(settings: &DeliverySettings, urgent: bool, local_time: NaiveTime) -> DeliveryPlan {
    let mut plan = DeliveryPlan::default();
    if !settings.enabled {
        return plan;
    }

    let quiet = settings
        .quiet_hours
        .is_some_and(|q| q.contains(local_time))
        && !settings.override_quiet_hours
        && !urgent;

    for method in settings.methods.iter().copied().filter(DeliveryMethod::is_external) {
        match settings.frequency {
            Frequency::Never => plan.suppressed.push((method, REASON_OPTED_OUT)),
            f @ (Frequency::Daily | Frequency::Weekly) => plan.digest.push((method, f)),
            Frequency::Instant if quiet => plan.suppressed.push((method, REASON_QUIET_HOURS)),
            Frequency::Instant => plan.deliver.push(method),
        }
    }

    plan
}

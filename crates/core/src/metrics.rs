//! Delivery funnel aggregation.
//!
//! Pure functions turning a set of [`FunnelState`]s into counts, rates and
//! average latencies. Rates are percentages rounded to two decimals.
//!
//! Counts come in two flavours:
//! - `by_status`: where each attempt currently sits;
//! - `reached`: how many attempts ever reached each step (a read attempt
//!   also counts as sent and delivered). Rates are computed from these.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DurationRound, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::funnel::{DeliveryStatus, FunnelState};
use crate::types::Timestamp;

/// Current-status breakdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub sent: u64,
    pub delivered: u64,
    pub read: u64,
    pub clicked: u64,
    pub failed: u64,
}

/// Aggregated funnel metrics over a set of attempts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FunnelMetrics {
    pub total: u64,
    pub by_status: StatusCounts,
    pub reached: StatusCounts,
    pub delivery_rate: f64,
    pub read_rate: f64,
    pub click_rate: f64,
    pub failure_rate: f64,
    pub avg_time_to_deliver_ms: Option<f64>,
    pub avg_time_to_read_ms: Option<f64>,
    pub avg_time_to_click_ms: Option<f64>,
}

/// Running average that ignores missing samples.
#[derive(Default)]
struct Mean {
    sum: i64,
    count: u64,
}

impl Mean {
    fn push(&mut self, value: Option<i64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| round2(self.sum as f64 / self.count as f64))
    }
}

/// `numerator / denominator` as a percentage, 0 when the denominator is 0.
pub fn percentage(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    round2(numerator as f64 * 100.0 / denominator as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Aggregate a set of attempts.
pub fn compute_metrics<'a, I>(states: I) -> FunnelMetrics
where
    I: IntoIterator<Item = &'a FunnelState>,
{
    let mut m = FunnelMetrics::default();
    let mut deliver = Mean::default();
    let mut read = Mean::default();
    let mut click = Mean::default();

    for state in states {
        m.total += 1;

        let slot = match state.status {
            DeliveryStatus::Sent => &mut m.by_status.sent,
            DeliveryStatus::Delivered => &mut m.by_status.delivered,
            DeliveryStatus::Read => &mut m.by_status.read,
            DeliveryStatus::Clicked => &mut m.by_status.clicked,
            DeliveryStatus::Failed => &mut m.by_status.failed,
        };
        *slot += 1;

        m.reached.sent += u64::from(state.was_sent());
        m.reached.delivered += u64::from(state.was_delivered());
        m.reached.read += u64::from(state.was_read());
        m.reached.clicked += u64::from(state.was_clicked());
        m.reached.failed += u64::from(state.status == DeliveryStatus::Failed);

        deliver.push(state.time_to_deliver_ms);
        read.push(state.time_to_read_ms);
        click.push(state.time_to_click_ms);
    }

    m.delivery_rate = percentage(m.reached.delivered, m.reached.sent);
    m.read_rate = percentage(m.reached.read, m.reached.delivered);
    m.click_rate = percentage(m.reached.clicked, m.reached.delivered);
    m.failure_rate = percentage(m.reached.failed, m.total);
    m.avg_time_to_deliver_ms = deliver.value();
    m.avg_time_to_read_ms = read.value();
    m.avg_time_to_click_ms = click.value();
    m
}

/// Aggregate `items` separately per grouping key.
pub fn group_metrics<T, K, FK, FS>(items: &[T], key: FK, state: FS) -> BTreeMap<K, FunnelMetrics>
where
    K: Ord,
    FK: Fn(&T) -> K,
    FS: Fn(&T) -> &FunnelState,
{
    let mut groups: BTreeMap<K, Vec<&FunnelState>> = BTreeMap::new();
    for item in items {
        groups.entry(key(item)).or_default().push(state(item));
    }
    groups
        .into_iter()
        .map(|(k, states)| (k, compute_metrics(states)))
        .collect()
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

/// Bucket width of a funnel timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineInterval {
    Hour,
    Day,
}

impl TimelineInterval {
    fn width(&self) -> TimeDelta {
        match self {
            TimelineInterval::Hour => TimeDelta::hours(1),
            TimelineInterval::Day => TimeDelta::days(1),
        }
    }

    /// Start of the bucket containing `ts`.
    pub fn bucket_start(&self, ts: Timestamp) -> Timestamp {
        ts.duration_trunc(self.width()).unwrap_or(ts)
    }
}

impl fmt::Display for TimelineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimelineInterval::Hour => "hour",
            TimelineInterval::Day => "day",
        })
    }
}

impl FromStr for TimelineInterval {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(TimelineInterval::Hour),
            "day" => Ok(TimelineInterval::Day),
            other => Err(CoreError::Validation(format!(
                "Unknown timeline interval '{other}'"
            ))),
        }
    }
}

/// Metrics of all attempts created inside one bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineBucket {
    pub bucket_start: Timestamp,
    pub metrics: FunnelMetrics,
}

/// Bucket `items` by creation time; buckets are returned oldest first and
/// only buckets containing at least one attempt are present.
pub fn timeline<T, FC, FS>(
    items: &[T],
    interval: TimelineInterval,
    created_at: FC,
    state: FS,
) -> Vec<TimelineBucket>
where
    FC: Fn(&T) -> Timestamp,
    FS: Fn(&T) -> &FunnelState,
{
    group_metrics(items, |item| interval.bucket_start(created_at(item)), state)
        .into_iter()
        .map(|(bucket_start, metrics)| TimelineBucket {
            bucket_start,
            metrics,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::funnel::FunnelEvent;

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 5, 4, 10, 15, 0).unwrap()
    }

    fn delivered(after_ms: i64) -> FunnelState {
        let mut s = FunnelState::sent(t0());
        s.apply(&FunnelEvent::Delivered, t0() + Duration::milliseconds(after_ms))
            .unwrap();
        s
    }

    fn read(after_ms: i64) -> FunnelState {
        let mut s = delivered(100);
        s.apply(
            &FunnelEvent::Read,
            t0() + Duration::milliseconds(100 + after_ms),
        )
        .unwrap();
        s
    }

    #[test]
    fn rates_follow_the_funnel() {
        // 10 sent, 6 delivered, 3 of those read.
        let mut states = Vec::new();
        states.extend((0..4).map(|_| FunnelState::sent(t0())));
        states.extend((0..3).map(|_| delivered(100)));
        states.extend((0..3).map(|_| read(1000)));

        let m = compute_metrics(&states);
        assert_eq!(m.total, 10);
        assert_eq!(m.reached.sent, 10);
        assert_eq!(m.reached.delivered, 6);
        assert_eq!(m.reached.read, 3);
        assert_eq!(m.by_status.sent, 4);
        assert_eq!(m.by_status.delivered, 3);
        assert_eq!(m.by_status.read, 3);
        assert_eq!(m.delivery_rate, 60.0);
        assert_eq!(m.read_rate, 50.0);
        assert_eq!(m.click_rate, 0.0);
        assert_eq!(m.failure_rate, 0.0);
        assert_eq!(m.avg_time_to_deliver_ms, Some(100.0));
        assert_eq!(m.avg_time_to_read_ms, Some(1000.0));
        assert_eq!(m.avg_time_to_click_ms, None);
    }

    #[test]
    fn failure_rate_uses_total() {
        let states = vec![
            FunnelState::sent(t0()),
            FunnelState::sent(t0()),
            FunnelState::failed("opted_out", t0()),
        ];
        let m = compute_metrics(&states);
        assert_eq!(m.reached.sent, 2);
        assert_eq!(m.by_status.failed, 1);
        assert_eq!(m.failure_rate, 33.33);
    }

    #[test]
    fn empty_input_has_zero_rates() {
        let m = compute_metrics(std::iter::empty());
        assert_eq!(m.total, 0);
        assert_eq!(m.delivery_rate, 0.0);
        assert_eq!(m.avg_time_to_deliver_ms, None);
    }

    #[test]
    fn group_by_key() {
        let items = vec![
            ("email", delivered(10)),
            ("push", FunnelState::sent(t0())),
            ("email", FunnelState::sent(t0())),
        ];
        let groups = group_metrics(&items, |(k, _)| *k, |(_, s)| s);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["email"].total, 2);
        assert_eq!(groups["email"].delivery_rate, 50.0);
        assert_eq!(groups["push"].total, 1);
    }

    #[test]
    fn timeline_buckets_are_chronological() {
        let day2 = t0() + Duration::days(1);
        let items = vec![
            (day2, FunnelState::sent(day2)),
            (t0(), FunnelState::sent(t0())),
            (t0() + Duration::hours(2), delivered(5)),
        ];
        let buckets = timeline(&items, TimelineInterval::Day, |(ts, _)| *ts, |(_, s)| s);

        assert_eq!(buckets.len(), 2);
        assert_eq!(
            buckets[0].bucket_start,
            Utc.with_ymd_and_hms(2026, 5, 4, 0, 0, 0).unwrap()
        );
        assert_eq!(buckets[0].metrics.total, 2);
        assert_eq!(buckets[1].metrics.total, 1);
    }

    #[test]
    fn hourly_buckets() {
        let items = vec![
            (t0(), FunnelState::sent(t0())),
            (t0() + Duration::minutes(30), FunnelState::sent(t0())),
            (t0() + Duration::minutes(50), FunnelState::sent(t0())),
        ];
        let buckets = timeline(&items, TimelineInterval::Hour, |(ts, _)| *ts, |(_, s)| s);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].metrics.total, 2);
        assert_eq!(
            buckets[1].bucket_start,
            Utc.with_ymd_and_hms(2026, 5, 4, 11, 0, 0).unwrap()
        );
    }

    #[test]
    fn interval_parses() {
        assert_eq!("hour".parse::<TimelineInterval>().unwrap(), TimelineInterval::Hour);
        assert!("week".parse::<TimelineInterval>().is_err());
    }
}

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 86_400_000;

/// Rollup granularity. All boundaries are UTC; months follow the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    Month,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [Granularity::Hour, Granularity::Day, Granularity::Month];

    pub fn table_name(self) -> &'static str {
        match self {
            Self::Hour => "hourly_stats",
            Self::Day => "daily_stats",
            Self::Month => "monthly_stats",
        }
    }

    /// Bucket start for `ts_ms`. Inputs outside the calendar range are
    /// clamped to its nearest end first.
    pub fn truncate(self, ts_ms: i64) -> i64 {
        let ts_ms = clamp_to_calendar(ts_ms);
        match self {
            Self::Hour => ts_ms.div_euclid(HOUR_MS) * HOUR_MS,
            Self::Day => ts_ms.div_euclid(DAY_MS) * DAY_MS,
            Self::Month => month_start(ts_ms).unwrap_or_else(|| Self::Day.truncate(ts_ms)),
        }
    }

    /// Start of the bucket following the one that starts at `bucket_start`.
    pub fn next_bucket(self, bucket_start: i64) -> i64 {
        match self {
            Self::Hour => bucket_start.saturating_add(HOUR_MS),
            Self::Day => bucket_start.saturating_add(DAY_MS),
            Self::Month => next_month_start(bucket_start)
                .unwrap_or_else(|| bucket_start.saturating_add(31 * DAY_MS)),
        }
    }
}

fn min_timestamp_ms() -> i64 {
    DateTime::<Utc>::MIN_UTC.timestamp_millis()
}

fn max_timestamp_ms() -> i64 {
    DateTime::<Utc>::MAX_UTC.timestamp_millis()
}

fn clamp_to_calendar(ts_ms: i64) -> i64 {
    ts_ms.clamp(min_timestamp_ms(), max_timestamp_ms())
}

/// True when `ts_ms` names an instant chrono can represent. Every stored
/// event timestamp must satisfy this so it lands in exactly one bucket.
pub fn timestamp_in_range(ts_ms: i64) -> bool {
    (min_timestamp_ms()..=max_timestamp_ms()).contains(&ts_ms)
}

fn first_of_month(ts_ms: i64) -> Option<NaiveDate> {
    let dt = DateTime::<Utc>::from_timestamp_millis(ts_ms)?;
    NaiveDate::from_ymd_opt(dt.year(), dt.month(), 1)
}

fn date_to_ms(date: NaiveDate) -> Option<i64> {
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

fn month_start(ts_ms: i64) -> Option<i64> {
    date_to_ms(first_of_month(ts_ms)?)
}

fn next_month_start(ts_ms: i64) -> Option<i64> {
    date_to_ms(first_of_month(ts_ms)?.checked_add_months(Months::new(1))?)
}

/// Merges the buckets touched by `timestamps` into sorted, disjoint
/// `[start, end)` spans; adjacent buckets collapse into one span.
pub fn bucket_spans(
    granularity: Granularity,
    timestamps: impl IntoIterator<Item = i64>,
) -> Vec<(i64, i64)> {
    let mut starts: Vec<i64> = timestamps
        .into_iter()
        .map(|ts| granularity.truncate(ts))
        .collect();
    starts.sort_unstable();
    starts.dedup();
    let mut spans: Vec<(i64, i64)> = Vec::new();
    for start in starts {
        let end = granularity.next_bucket(start);
        match spans.last_mut() {
            Some(last) if last.1 == start => last.1 = end,
            _ => spans.push((start, end)),
        }
    }
    spans
}

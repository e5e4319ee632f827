use std::fmt::Formatter;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A half-open time window `[start, end)`.
///
/// The end is authoritative for expiry: a span has ended at the instant
/// its end time is reached.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSpan {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn starting_at(start: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            start,
            end: start + duration,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    pub fn has_ended(&self, at: DateTime<Utc>) -> bool {
        self.end <= at
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl std::fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", rfc3339(&self.start), rfc3339(&self.end))
    }
}

/// Render a timestamp the way it is persisted in policy conditions:
/// RFC 3339, UTC, seconds precision, `Z` suffix.
pub fn rfc3339(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};

use crate::{error::SimError, time::SimTime};

/// Calendar simulation time: whole milliseconds since the Unix epoch.
///
/// Relative time is a [`TimeDelta`]; sub-millisecond parts are dropped so
/// all arithmetic stays exact.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SimTimeCalendar(i64);

impl SimTimeCalendar {
    pub fn from_millis(ms: i64) -> Result<Self, SimError> {
        DateTime::<Utc>::from_timestamp_millis(ms)
            .map(|_| Self(ms))
            .ok_or_else(|| SimError::TimeDomain(format!("{ms} ms is not a calendar instant")))
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }

    /// parse an RFC 3339 timestamp such as `2024-03-01T08:00:00Z`
    pub fn parse(s: &str) -> Result<Self, SimError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self::from_datetime(dt.with_timezone(&Utc)))
            .map_err(|e| SimError::TimeDomain(format!("{s:?}: {e}")))
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.0)
    }
}

impl From<DateTime<Utc>> for SimTimeCalendar {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_datetime(dt)
    }
}

impl fmt::Display for SimTimeCalendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl SimTime for SimTimeCalendar {
    type Duration = TimeDelta;

    fn zero() -> Self {
        Self(0)
    }

    fn zero_duration() -> TimeDelta {
        TimeDelta::zero()
    }

    fn add_duration(self, d: TimeDelta) -> Self {
        Self(self.0.saturating_add(d.num_milliseconds()))
    }

    fn sub_duration(self, d: TimeDelta) -> Self {
        Self(self.0.saturating_sub(d.num_milliseconds()))
    }

    fn minus(self, other: Self) -> TimeDelta {
        clamped_delta(self.0.saturating_sub(other.0))
    }

    fn duration_from_secs_f64(secs: f64) -> TimeDelta {
        clamped_delta((secs * 1000.0).round() as i64)
    }

    fn duration_as_secs_f64(d: TimeDelta) -> f64 {
        d.num_milliseconds() as f64 / 1000.0
    }
}

fn clamped_delta(ms: i64) -> TimeDelta {
    TimeDelta::try_milliseconds(ms).unwrap_or(if ms < 0 { TimeDelta::MIN } else { TimeDelta::MAX })
}

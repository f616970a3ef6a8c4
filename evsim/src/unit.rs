use std::{cmp::Ordering, fmt, str::FromStr};

use crate::{error::SimError, time::SimTime};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TimeUnit {
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

impl TimeUnit {
    pub fn seconds(self) -> f64 {
        match self {
            TimeUnit::Nanosecond => 1e-9,
            TimeUnit::Microsecond => 1e-6,
            TimeUnit::Millisecond => 1e-3,
            TimeUnit::Second => 1.0,
            TimeUnit::Minute => 60.0,
            TimeUnit::Hour => 3_600.0,
            TimeUnit::Day => 86_400.0,
            TimeUnit::Week => 604_800.0,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            TimeUnit::Nanosecond => "ns",
            TimeUnit::Microsecond => "us",
            TimeUnit::Millisecond => "ms",
            TimeUnit::Second => "s",
            TimeUnit::Minute => "min",
            TimeUnit::Hour => "h",
            TimeUnit::Day => "d",
            TimeUnit::Week => "wk",
        }
    }
}

impl FromStr for TimeUnit {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unit = match s.trim() {
            "ns" => TimeUnit::Nanosecond,
            "us" | "µs" => TimeUnit::Microsecond,
            "ms" => TimeUnit::Millisecond,
            "s" | "sec" => TimeUnit::Second,
            "min" => TimeUnit::Minute,
            "h" | "hr" => TimeUnit::Hour,
            "d" | "day" => TimeUnit::Day,
            "wk" | "week" => TimeUnit::Week,
            other => {
                return Err(SimError::TimeDomain(format!(
                    "{other:?} is not a unit of time"
                )));
            }
        };
        Ok(unit)
    }
}

/// A span of time carrying its display unit.
///
/// The magnitude is kept in seconds so values in different units compare
/// and add without conversion at the call site.
#[derive(Debug, Copy, Clone)]
pub struct UnitDuration {
    si: f64,
    unit: TimeUnit,
}

impl UnitDuration {
    pub fn new(value: f64, unit: TimeUnit) -> Result<Self, SimError> {
        let si = finite_si(value, unit)?;
        Ok(Self { si, unit })
    }

    pub fn value(self) -> f64 {
        self.si / self.unit.seconds()
    }

    pub fn unit(self) -> TimeUnit {
        self.unit
    }

    pub fn as_seconds(self) -> f64 {
        self.si
    }

    pub fn in_unit(self, unit: TimeUnit) -> Self {
        Self { si: self.si, unit }
    }
}

impl PartialEq for UnitDuration {
    fn eq(&self, other: &Self) -> bool {
        self.si == other.si
    }
}

impl PartialOrd for UnitDuration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.si.partial_cmp(&other.si)
    }
}

impl fmt::Display for UnitDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value(), self.unit.symbol())
    }
}

impl FromStr for UnitDuration {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, unit) = split_quantity(s)?;
        Self::new(value, unit)
    }
}

/// Absolute simulation time with a physical unit.
#[derive(Debug, Copy, Clone)]
pub struct SimTimeUnit {
    si: f64,
    unit: TimeUnit,
}

impl SimTimeUnit {
    pub fn new(value: f64, unit: TimeUnit) -> Result<Self, SimError> {
        let si = finite_si(value, unit)?;
        Ok(Self { si, unit })
    }

    pub fn value(self) -> f64 {
        self.si / self.unit.seconds()
    }

    pub fn unit(self) -> TimeUnit {
        self.unit
    }

    pub fn as_seconds(self) -> f64 {
        self.si
    }
}

impl PartialEq for SimTimeUnit {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SimTimeUnit {}

impl PartialOrd for SimTimeUnit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimTimeUnit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.si.total_cmp(&other.si)
    }
}

impl fmt::Display for SimTimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value(), self.unit.symbol())
    }
}

impl FromStr for SimTimeUnit {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, unit) = split_quantity(s)?;
        Self::new(value, unit)
    }
}

impl SimTime for SimTimeUnit {
    type Duration = UnitDuration;

    fn zero() -> Self {
        Self {
            si: 0.0,
            unit: TimeUnit::Second,
        }
    }

    fn zero_duration() -> UnitDuration {
        UnitDuration {
            si: 0.0,
            unit: TimeUnit::Second,
        }
    }

    // the absolute time keeps its own display unit
    fn add_duration(self, d: UnitDuration) -> Self {
        Self {
            si: self.si + d.si + 0.0,
            unit: self.unit,
        }
    }

    fn sub_duration(self, d: UnitDuration) -> Self {
        Self {
            si: self.si - d.si + 0.0,
            unit: self.unit,
        }
    }

    fn minus(self, other: Self) -> UnitDuration {
        UnitDuration {
            si: self.si - other.si,
            unit: self.unit,
        }
    }

    fn duration_from_secs_f64(secs: f64) -> UnitDuration {
        UnitDuration {
            si: secs,
            unit: TimeUnit::Second,
        }
    }

    fn duration_as_secs_f64(d: UnitDuration) -> f64 {
        d.si
    }

    fn is_finite(self) -> bool {
        self.si.is_finite()
    }
}

fn finite_si(value: f64, unit: TimeUnit) -> Result<f64, SimError> {
    let si = value * unit.seconds();
    if si.is_finite() {
        Ok(si + 0.0)
    } else {
        Err(SimError::TimeDomain(format!(
            "{value} {} is not a finite time",
            unit.symbol()
        )))
    }
}

fn split_quantity(s: &str) -> Result<(f64, TimeUnit), SimError> {
    let s = s.trim();
    let split = s.trim_end_matches(|c: char| c.is_alphabetic()).len();
    if split == s.len() {
        return Err(SimError::TimeDomain(format!("{s:?} has no time unit")));
    }
    let (number, unit) = s.split_at(split);
    let value = number
        .trim()
        .parse::<f64>()
        .map_err(|e| SimError::TimeDomain(format!("{s:?}: {e}")))?;
    Ok((value, unit.parse()?))
}

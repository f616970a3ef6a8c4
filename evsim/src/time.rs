use std::cmp::Ordering;
use std::fmt;

use crate::error::SimError;

/// Absolute simulation time.
///
/// Every simulator is parameterised by exactly one implementation, so a
/// replication can never mix representations. The associated `Duration`
/// is the relative time that can be added to or subtracted from it.
pub trait SimTime: Copy + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static {
    type Duration: Copy + PartialOrd + fmt::Debug + fmt::Display + Send + Sync + 'static;

    fn zero() -> Self;

    fn zero_duration() -> Self::Duration;

    fn add_duration(self, d: Self::Duration) -> Self;

    fn sub_duration(self, d: Self::Duration) -> Self;

    /// relative time from `other` to `self`
    fn minus(self, other: Self) -> Self::Duration;

    /// Wall-clock seconds expressed as a relative simulation time.
    ///
    /// Unitless floating domains map one second to one simulation unit.
    fn duration_from_secs_f64(secs: f64) -> Self::Duration;

    fn duration_as_secs_f64(d: Self::Duration) -> f64;

    fn set_zero(&mut self) {
        *self = Self::zero();
    }

    /// False once arithmetic has left the representable range, e.g. a
    /// float time that overflowed or picked up a NaN.
    fn is_finite(self) -> bool {
        true
    }
}

macro_rules! float_time {
    ($name:ident, $float:ty, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Copy, Clone, Default)]
        pub struct $name($float);

        impl $name {
            pub const ZERO: $name = $name(0.0);

            pub fn new(value: $float) -> Result<Self, SimError> {
                if value.is_finite() {
                    // folds -0.0 into 0.0 so equal instants compare equal
                    Ok(Self(value + 0.0))
                } else {
                    Err(SimError::TimeDomain(format!(
                        "{} cannot hold {value}",
                        stringify!($name)
                    )))
                }
            }

            pub fn get(self) -> $float {
                self.0
            }
        }

        impl TryFrom<$float> for $name {
            type Error = SimError;

            fn try_from(value: $float) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.cmp(other) == Ordering::Equal
            }
        }

        impl Eq for $name {}

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                self.0.total_cmp(&other.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl SimTime for $name {
            type Duration = $float;

            fn zero() -> Self {
                Self::ZERO
            }

            fn zero_duration() -> $float {
                0.0
            }

            fn add_duration(self, d: $float) -> Self {
                Self(self.0 + d + 0.0)
            }

            fn sub_duration(self, d: $float) -> Self {
                Self(self.0 - d + 0.0)
            }

            fn minus(self, other: Self) -> $float {
                self.0 - other.0
            }

            fn duration_from_secs_f64(secs: f64) -> $float {
                secs as $float
            }

            fn duration_as_secs_f64(d: $float) -> f64 {
                d as f64
            }

            fn is_finite(self) -> bool {
                self.0.is_finite()
            }
        }
    };
}

float_time!(SimTimeDouble, f64, "double precision simulation time");
float_time!(SimTimeFloat, f32, "single precision simulation time");

/// Integer simulation time with exact arithmetic, one tick per
/// millisecond.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SimTimeLong(pub i64);

impl fmt::Display for SimTimeLong {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SimTime for SimTimeLong {
    type Duration = i64;

    fn zero() -> Self {
        SimTimeLong(0)
    }

    fn zero_duration() -> i64 {
        0
    }

    fn add_duration(self, d: i64) -> Self {
        SimTimeLong(self.0.saturating_add(d))
    }

    fn sub_duration(self, d: i64) -> Self {
        SimTimeLong(self.0.saturating_sub(d))
    }

    fn minus(self, other: Self) -> i64 {
        self.0.saturating_sub(other.0)
    }

    fn duration_from_secs_f64(secs: f64) -> i64 {
        (secs * 1_000.0).round() as i64
    }

    fn duration_as_secs_f64(d: i64) -> f64 {
        d as f64 / 1_000.0
    }
}

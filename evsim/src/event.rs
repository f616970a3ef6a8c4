use std::{cmp::Ordering, fmt};

use crate::{
    error::{ActionError, SimError},
    simulator::Simulator,
    time::SimTime,
};

/// Event urgency; among events at the same instant the higher one runs first.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Priority(i8);

impl Priority {
    pub const MIN: Priority = Priority(1);
    pub const NORMAL: Priority = Priority(5);
    pub const MAX: Priority = Priority(10);

    pub fn new(value: i8) -> Result<Self, SimError> {
        if (Self::MIN.0..=Self::MAX.0).contains(&value) {
            Ok(Priority(value))
        } else {
            Err(SimError::InvalidPriority(value))
        }
    }

    pub fn get(self) -> i8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

impl TryFrom<i8> for Priority {
    type Error = SimError;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        Priority::new(value)
    }
}

/// Position of an event in the queue: time ascending, priority
/// descending, sequence number ascending.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct EventKey<T> {
    pub time: T,
    pub priority: Priority,
    pub seq: u64,
}

impl<T: Ord> Ord for EventKey<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| other.priority.cmp(&self.priority))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl<T: Ord> PartialOrd for EventKey<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Identity of a scheduled event, returned by every schedule call and
/// used to cancel it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct EventHandle<T>(pub(crate) EventKey<T>);

impl<T: Copy> EventHandle<T> {
    pub fn time(&self) -> T {
        self.0.time
    }

    pub fn priority(&self) -> Priority {
        self.0.priority
    }

    pub fn seq(&self) -> u64 {
        self.0.seq
    }
}

pub type Action<T> = Box<dyn FnOnce(&Simulator<T>) -> Result<(), ActionError> + Send>;

/// A queued action together with its position in the event order.
pub struct ScheduledEvent<T: SimTime> {
    pub(crate) key: EventKey<T>,
    pub(crate) action: Action<T>,
}

impl<T: SimTime> ScheduledEvent<T> {
    pub fn new<F>(time: T, priority: Priority, seq: u64, action: F) -> Self
    where
        F: FnOnce(&Simulator<T>) -> Result<(), ActionError> + Send + 'static,
    {
        Self {
            key: EventKey {
                time,
                priority,
                seq,
            },
            action: Box::new(action),
        }
    }

    pub fn time(&self) -> T {
        self.key.time
    }

    pub fn priority(&self) -> Priority {
        self.key.priority
    }

    pub fn seq(&self) -> u64 {
        self.key.seq
    }

    pub fn handle(&self) -> EventHandle<T> {
        EventHandle(self.key)
    }

    pub(crate) fn execute(self, sim: &Simulator<T>) -> Result<(), ActionError> {
        (self.action)(sim)
    }
}

impl<T: SimTime> fmt::Debug for ScheduledEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} @{} [p{}]",
            self.key.seq, self.key.time, self.key.priority.0
        )
    }
}

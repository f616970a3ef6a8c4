mod time;
mod calendar;
mod unit;
mod error;
mod event;
mod queue;
mod notify;
mod replication;
mod simulator;
mod realtime;
mod experiment;

pub use time::{SimTime, SimTimeDouble, SimTimeFloat, SimTimeLong};
pub use chrono::TimeDelta;
pub use calendar::SimTimeCalendar;
pub use unit::{SimTimeUnit, TimeUnit, UnitDuration};
pub use error::{ActionError, SimError, SimRuntimeError};
pub use event::{Action, EventHandle, EventKey, Priority, ScheduledEvent};
pub use queue::EventQueue;
pub use notify::{
    ListenerId, Notification, NotificationContent, NotificationKind, SimListener, StopReason,
};
pub use replication::{Replication, ReplicationBuilder};
pub use simulator::{Model, SimState, Simulator, WeakSimulator};
pub use realtime::RealTimeSimulator;
pub use experiment::{Experiment, ReplicationContext, ReplicationReport};

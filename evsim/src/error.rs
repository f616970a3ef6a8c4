use thiserror::Error;

use crate::simulator::SimState;

/// Error returned by a model action; anything boxable works.
pub type ActionError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("time domain error: {0}")]
    TimeDomain(String),
    #[error("cannot schedule at {time}, current time is {now}")]
    PastExecution { time: String, now: String },
    #[error("priority {0} out of range")]
    InvalidPriority(i8),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("cannot {operation} while simulator is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SimState,
    },
    #[error("event #{0} is already queued")]
    DuplicateEvent(u64),
    #[error("replication has ended")]
    ReplicationEnded,
    #[error("no tokio runtime available to run the simulator")]
    NoRuntime,
    #[error(transparent)]
    Runtime(#[from] SimRuntimeError),
    #[error("execution task failed: {0}")]
    Worker(String),
}

/// failure of a single event action; aborts the replication
#[derive(Error, Debug, Clone, PartialEq)]
#[error("event #{seq} at t={time} failed: {message}")]
pub struct SimRuntimeError {
    pub seq: u64,
    pub time: String,
    pub message: String,
}

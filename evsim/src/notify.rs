use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{error::SimRuntimeError, time::SimTime};

/// Lifecycle notifications a simulator publishes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum NotificationKind {
    Initialized,
    StartReplication,
    Started,
    Stopped,
    TimeChanged,
    Step,
    Warmup,
    EndReplication,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 8] = [
        NotificationKind::Initialized,
        NotificationKind::StartReplication,
        NotificationKind::Started,
        NotificationKind::Stopped,
        NotificationKind::TimeChanged,
        NotificationKind::Step,
        NotificationKind::Warmup,
        NotificationKind::EndReplication,
    ];
}

/// why the run loop came to rest
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// `stop()` or `request_stop()` was called
    Requested,
    /// the `run_up_to` target was reached
    TargetReached,
    /// the queue ran dry
    EndOfEvents,
    /// the next event lies past the replication end time
    EndTimeReached,
    /// an action failed
    Aborted(SimRuntimeError),
}

impl StopReason {
    /// true when the replication is over and cannot be resumed
    pub fn ends_replication(&self) -> bool {
        !matches!(self, StopReason::Requested | StopReason::TargetReached)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationContent {
    None,
    Stop(StopReason),
}

#[derive(Debug, Clone)]
pub struct Notification<T> {
    pub kind: NotificationKind,
    pub replication_id: Arc<str>,
    pub time: T,
    pub content: NotificationContent,
}

impl<T> Notification<T> {
    pub fn stop_reason(&self) -> Option<&StopReason> {
        match &self.content {
            NotificationContent::Stop(reason) => Some(reason),
            NotificationContent::None => None,
        }
    }
}

/// Subscriber to simulator notifications.
///
/// Called synchronously on the execution thread, so slow listeners slow
/// the simulation down. Implementations that need to query the simulator
/// should keep a [`WeakSimulator`](crate::WeakSimulator), never a strong
/// handle.
pub trait SimListener<T: SimTime>: Send + Sync {
    fn notify(&self, notification: &Notification<T>);
}

impl<T, F> SimListener<T> for F
where
    T: SimTime,
    F: Fn(&Notification<T>) + Send + Sync,
{
    fn notify(&self, notification: &Notification<T>) {
        self(notification)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(0);

pub(crate) struct ListenerRegistry<T: SimTime> {
    by_kind: HashMap<NotificationKind, Vec<(ListenerId, Arc<dyn SimListener<T>>)>>,
}

impl<T: SimTime> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            by_kind: HashMap::new(),
        }
    }

    pub fn add(
        &mut self,
        kinds: &[NotificationKind],
        listener: Arc<dyn SimListener<T>>,
    ) -> ListenerId {
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        for kind in kinds {
            let subscribers = self.by_kind.entry(*kind).or_default();
            if !subscribers.iter().any(|(existing, _)| *existing == id) {
                subscribers.push((id, Arc::clone(&listener)));
            }
        }
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let mut found = false;
        for subscribers in self.by_kind.values_mut() {
            let before = subscribers.len();
            subscribers.retain(|(existing, _)| *existing != id);
            found |= subscribers.len() != before;
        }
        found
    }

    /// snapshot of the subscribers so delivery happens without the lock
    pub fn subscribers(&self, kind: NotificationKind) -> Vec<Arc<dyn SimListener<T>>> {
        self.by_kind
            .get(&kind)
            .map(|subs| subs.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }
}

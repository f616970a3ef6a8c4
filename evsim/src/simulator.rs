use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak},
};

use tokio::{
    runtime::Handle,
    sync::{Notify, watch},
    task::JoinHandle,
};

use crate::{
    error::{ActionError, SimError, SimRuntimeError},
    event::{EventHandle, Priority, ScheduledEvent},
    notify::{
        ListenerId, ListenerRegistry, Notification, NotificationContent, NotificationKind,
        SimListener, StopReason,
    },
    queue::EventQueue,
    replication::Replication,
    time::SimTime,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SimState {
    NotInitialized,
    Initialized,
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl SimState {
    pub fn is_starting_or_running(self) -> bool {
        matches!(self, SimState::Starting | SimState::Started)
    }
}

/// A model builds its initial events when a replication is initialized.
pub trait Model<T: SimTime>: Send {
    fn construct_model(&mut self, sim: &Simulator<T>) -> Result<(), SimError>;
}

impl<T, F> Model<T> for F
where
    T: SimTime,
    F: FnMut(&Simulator<T>) -> Result<(), SimError> + Send,
{
    fn construct_model(&mut self, sim: &Simulator<T>) -> Result<(), SimError> {
        self(sim)
    }
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct RunTarget<T> {
    time: T,
    inclusive: bool,
}

impl<T> RunTarget<T> {
    pub(crate) fn before(time: T) -> Self {
        Self {
            time,
            inclusive: false,
        }
    }

    pub(crate) fn including(time: T) -> Self {
        Self {
            time,
            inclusive: true,
        }
    }
}

enum Next<T: SimTime> {
    Execute(ScheduledEvent<T>),
    Wait,
    Halt(StopReason),
}

struct Core<T: SimTime> {
    state: SimState,
    state_tx: watch::Sender<SimState>,
    now: T,
    queue: EventQueue<T>,
    next_seq: u64,
    replication: Option<Replication<T>>,
    target: Option<RunTarget<T>>,
    pace_bound: Option<T>,
    stop_requested: bool,
    replication_started: bool,
    replication_ended: bool,
    executed: u64,
    last_stop: Option<StopReason>,
}

impl<T: SimTime> Core<T> {
    fn set_state(&mut self, state: SimState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    /// Decide what the run loop does next. `bounded` applies the stop
    /// flag, run target and pacing bound; single steps ignore them.
    fn next_step(&mut self, bounded: bool) -> Next<T> {
        if bounded && self.stop_requested {
            return Next::Halt(StopReason::Requested);
        }
        let Some(key) = self.queue.peek_first().copied() else {
            return Next::Halt(StopReason::EndOfEvents);
        };
        if let Some(end) = self.replication.as_ref().map(Replication::end_time) {
            if key.time > end {
                self.now = self.now.max(end);
                return Next::Halt(StopReason::EndTimeReached);
            }
        }
        if bounded {
            if let Some(target) = self.target {
                let beyond = if target.inclusive {
                    key.time > target.time
                } else {
                    key.time >= target.time
                };
                if beyond {
                    self.now = self.now.max(target.time);
                    return Next::Halt(StopReason::TargetReached);
                }
            }
            if self.pace_bound.is_some_and(|bound| key.time > bound) {
                return Next::Wait;
            }
        }
        match self.queue.remove_first() {
            Some(event) => Next::Execute(event),
            None => Next::Halt(StopReason::EndOfEvents),
        }
    }
}

struct Shared<T: SimTime> {
    core: Mutex<Core<T>>,
    listeners: RwLock<ListenerRegistry<T>>,
    wake: Notify,
    worker: Mutex<Option<JoinHandle<StopReason>>>,
}

/// Discrete-event simulator.
///
/// The handle is cheap to clone; all clones drive the same simulator.
/// Queue, time cursor and lifecycle state sit behind one lock, which every
/// scheduling call takes, including calls made from inside a running
/// action. The lock is never held while an action or a listener runs.
///
/// `start()` spawns the run loop on the current tokio runtime. Each event
/// action runs to completion there; `stop()` waits for the in-flight
/// action before returning.
pub struct Simulator<T: SimTime> {
    shared: Arc<Shared<T>>,
}

impl<T: SimTime> Clone for Simulator<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// non-owning handle for listeners and models that must not keep the
/// simulator alive
pub struct WeakSimulator<T: SimTime> {
    shared: Weak<Shared<T>>,
}

impl<T: SimTime> WeakSimulator<T> {
    pub fn upgrade(&self) -> Option<Simulator<T>> {
        self.shared.upgrade().map(|shared| Simulator { shared })
    }
}

impl<T: SimTime> Clone for WeakSimulator<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<T: SimTime> Simulator<T> {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(SimState::NotInitialized);
        let core = Core {
            state: SimState::NotInitialized,
            state_tx,
            now: T::zero(),
            queue: EventQueue::new(),
            next_seq: 0,
            replication: None,
            target: None,
            pace_bound: None,
            stop_requested: false,
            replication_started: false,
            replication_ended: false,
            executed: 0,
            last_stop: None,
        };
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(core),
                listeners: RwLock::new(ListenerRegistry::new()),
                wake: Notify::new(),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakSimulator<T> {
        WeakSimulator {
            shared: Arc::downgrade(&self.shared),
        }
    }

    fn core(&self) -> MutexGuard<'_, Core<T>> {
        self.shared.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn worker(&self) -> MutexGuard<'_, Option<JoinHandle<StopReason>>> {
        self.shared
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset for a new replication and let the model schedule its first
    /// events. Pending events of a previous replication are discarded.
    pub fn initialize<M>(&self, replication: Replication<T>, model: &mut M) -> Result<(), SimError>
    where
        M: Model<T> + ?Sized,
    {
        {
            let mut core = self.core();
            if core.state.is_starting_or_running() || core.state == SimState::Stopping {
                return Err(SimError::InvalidState {
                    operation: "initialize",
                    state: core.state,
                });
            }
            core.queue.clear();
            core.now = replication.start_time();
            core.target = None;
            core.pace_bound = None;
            core.stop_requested = false;
            core.replication_started = false;
            core.replication_ended = false;
            core.executed = 0;
            core.last_stop = None;
            core.replication = Some(replication.clone());
            core.set_state(SimState::Initialized);
        }
        self.worker().take();

        if replication.warmup_period() > T::zero_duration() {
            self.schedule_at(replication.warmup_time(), Priority::MAX, |sim| {
                sim.fire(NotificationKind::Warmup, NotificationContent::None);
                Ok(())
            })?;
        }
        if let Err(e) = model.construct_model(self) {
            let mut core = self.core();
            core.queue.clear();
            core.replication = None;
            core.set_state(SimState::NotInitialized);
            return Err(e);
        }

        tracing::info!(
            replication = replication.id(),
            start = %replication.start_time(),
            end = %replication.end_time(),
            pending = self.queue_len(),
            "replication initialized"
        );
        self.fire(NotificationKind::Initialized, NotificationContent::None);
        Ok(())
    }

    /// Schedule `action` at an absolute time. Scheduling exactly at the
    /// current time is allowed; the event runs after the events already
    /// queued for this instant with the same priority.
    pub fn schedule_at<F>(
        &self,
        time: T,
        priority: Priority,
        action: F,
    ) -> Result<EventHandle<T>, SimError>
    where
        F: FnOnce(&Simulator<T>) -> Result<(), ActionError> + Send + 'static,
    {
        let mut core = self.core();
        Self::schedule_locked(&mut core, time, priority, action)
    }

    pub fn schedule_after<F>(
        &self,
        delay: T::Duration,
        priority: Priority,
        action: F,
    ) -> Result<EventHandle<T>, SimError>
    where
        F: FnOnce(&Simulator<T>) -> Result<(), ActionError> + Send + 'static,
    {
        let mut core = self.core();
        let time = core.now.add_duration(delay);
        Self::schedule_locked(&mut core, time, priority, action)
    }

    pub fn schedule_now<F>(&self, priority: Priority, action: F) -> Result<EventHandle<T>, SimError>
    where
        F: FnOnce(&Simulator<T>) -> Result<(), ActionError> + Send + 'static,
    {
        let mut core = self.core();
        let time = core.now;
        Self::schedule_locked(&mut core, time, priority, action)
    }

    fn schedule_locked<F>(
        core: &mut Core<T>,
        time: T,
        priority: Priority,
        action: F,
    ) -> Result<EventHandle<T>, SimError>
    where
        F: FnOnce(&Simulator<T>) -> Result<(), ActionError> + Send + 'static,
    {
        if core.state == SimState::NotInitialized {
            return Err(SimError::InvalidState {
                operation: "schedule",
                state: core.state,
            });
        }
        if !time.is_finite() {
            return Err(SimError::TimeDomain(format!("event time {time} is not finite")));
        }
        if time < core.now {
            return Err(SimError::PastExecution {
                time: time.to_string(),
                now: core.now.to_string(),
            });
        }
        let seq = core.next_seq;
        core.next_seq += 1;
        let event = ScheduledEvent::new(time, priority, seq, action);
        Self::event_log(format_args!("schedule {event:?}"));
        core.queue.insert(event)
    }

    /// Remove a pending event. False when it already ran or was cancelled.
    pub fn cancel(&self, handle: &EventHandle<T>) -> bool {
        self.core().queue.cancel(handle)
    }

    pub fn now(&self) -> T {
        self.core().now
    }

    pub fn state(&self) -> SimState {
        self.core().state
    }

    pub fn is_starting_or_running(&self) -> bool {
        self.state().is_starting_or_running()
    }

    pub fn queue_len(&self) -> usize {
        self.core().queue.len()
    }

    pub fn next_event_time(&self) -> Option<T> {
        self.core().queue.first_time()
    }

    pub fn events_executed(&self) -> u64 {
        self.core().executed
    }

    pub fn replication(&self) -> Option<Replication<T>> {
        self.core().replication.clone()
    }

    /// reason of the most recent stop, if any
    pub fn last_stop(&self) -> Option<StopReason> {
        self.core().last_stop.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SimState> {
        self.core().state_tx.subscribe()
    }

    pub fn add_listener(
        &self,
        kinds: &[NotificationKind],
        listener: Arc<dyn SimListener<T>>,
    ) -> ListenerId {
        self.shared
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(kinds, listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Start the run loop on the current tokio runtime and return at once.
    pub fn start(&self) -> Result<(), SimError> {
        self.launch(None, None)
    }

    /// Run until just before `time`: events at exactly `time` stay queued.
    pub fn run_up_to(&self, time: T) -> Result<(), SimError> {
        self.launch(Some(RunTarget::before(time)), None)
    }

    /// Run until `time`, executing the events scheduled at `time` too.
    pub fn run_up_to_and_including(&self, time: T) -> Result<(), SimError> {
        self.launch(Some(RunTarget::including(time)), None)
    }

    /// Spawn the run loop. `pace_bound` is in place before the first
    /// event is picked up.
    pub(crate) fn launch(
        &self,
        target: Option<RunTarget<T>>,
        pace_bound: Option<T>,
    ) -> Result<(), SimError> {
        let runtime = Handle::try_current().map_err(|_| SimError::NoRuntime)?;
        {
            let mut core = self.core();
            let operation = if target.is_some() { "run up to" } else { "start" };
            match core.state {
                SimState::Initialized | SimState::Stopped => {}
                state => return Err(SimError::InvalidState { operation, state }),
            }
            if core.replication_ended {
                return Err(SimError::ReplicationEnded);
            }
            if let Some(target) = target {
                if !target.time.is_finite() {
                    return Err(SimError::TimeDomain(format!(
                        "run target {} is not finite",
                        target.time
                    )));
                }
                if target.time < core.now {
                    return Err(SimError::PastExecution {
                        time: target.time.to_string(),
                        now: core.now.to_string(),
                    });
                }
            }
            core.target = target;
            core.pace_bound = pace_bound;
            core.stop_requested = false;
            core.set_state(SimState::Starting);
        }
        let sim = self.clone();
        let handle = runtime.spawn(async move { sim.run_loop().await });
        *self.worker() = Some(handle);
        Ok(())
    }

    /// Ask the run loop to halt after the in-flight action. Does not
    /// block, so actions and listeners may call it.
    pub fn request_stop(&self) {
        {
            let mut core = self.core();
            if core.state.is_starting_or_running() {
                core.stop_requested = true;
            }
        }
        self.shared.wake.notify_one();
    }

    /// Halt the run loop and wait until the in-flight action is done.
    pub async fn stop(&self) -> Result<StopReason, SimError> {
        self.request_stop();
        self.join().await
    }

    /// Wait for the run loop to come to rest. A failed action is
    /// returned as [`SimError::Runtime`].
    pub async fn join(&self) -> Result<StopReason, SimError> {
        let handle = self.worker().take();
        match handle {
            Some(handle) => {
                handle.await.map_err(|e| SimError::Worker(e.to_string()))?;
            }
            None => {
                let mut rx = self.subscribe_state();
                rx.wait_for(|state| {
                    !state.is_starting_or_running() && *state != SimState::Stopping
                })
                .await
                .map_err(|e| SimError::Worker(e.to_string()))?;
            }
        }
        let core = self.core();
        match core.last_stop.clone() {
            Some(StopReason::Aborted(err)) => Err(SimError::Runtime(err)),
            Some(reason) => Ok(reason),
            None => Err(SimError::InvalidState {
                operation: "join",
                state: core.state,
            }),
        }
    }

    /// Execute exactly one event on the calling thread.
    ///
    /// Only allowed while the run loop is idle. Returns `Ok(false)` when
    /// the replication ended instead.
    pub fn step(&self) -> Result<bool, SimError> {
        let (next, previous, first) = {
            let mut core = self.core();
            let previous = core.state;
            if !matches!(previous, SimState::Initialized | SimState::Stopped) {
                return Err(SimError::InvalidState {
                    operation: "step",
                    state: previous,
                });
            }
            if core.replication_ended {
                return Err(SimError::ReplicationEnded);
            }
            // refuses start() and other steps until this one is done
            core.state = SimState::Started;
            let first = !core.replication_started;
            core.replication_started = true;
            (core.next_step(false), previous, first)
        };
        if first {
            self.fire(NotificationKind::StartReplication, NotificationContent::None);
        }
        match next {
            Next::Execute(event) => {
                let outcome = self.execute(event);
                match outcome {
                    Ok(()) => {
                        self.core().state = previous;
                        self.fire(NotificationKind::Step, NotificationContent::None);
                        Ok(true)
                    }
                    Err(err) => {
                        self.finish(StopReason::Aborted(err.clone()));
                        Err(SimError::Runtime(err))
                    }
                }
            }
            Next::Halt(reason) => {
                self.finish(reason);
                Ok(false)
            }
            Next::Wait => {
                self.core().state = previous;
                Ok(false)
            }
        }
    }

    async fn run_loop(self) -> StopReason {
        let first = {
            let mut core = self.core();
            core.set_state(SimState::Started);
            let first = !core.replication_started;
            core.replication_started = true;
            first
        };
        if first {
            self.fire(NotificationKind::StartReplication, NotificationContent::None);
        }
        tracing::info!(now = %self.now(), pending = self.queue_len(), "simulator started");
        self.fire(NotificationKind::Started, NotificationContent::None);

        let reason = loop {
            let next = self.core().next_step(true);
            match next {
                Next::Execute(event) => {
                    if let Err(err) = self.execute(event) {
                        break StopReason::Aborted(err);
                    }
                    // let control tasks in between events
                    tokio::task::yield_now().await;
                }
                Next::Wait => self.shared.wake.notified().await,
                Next::Halt(reason) => break reason,
            }
        };
        self.finish(reason.clone());
        reason
    }

    fn execute(&self, event: ScheduledEvent<T>) -> Result<(), SimRuntimeError> {
        let time = event.time();
        let seq = event.seq();
        let advanced = {
            let mut core = self.core();
            debug_assert!(time >= core.now, "time cursor moved backwards");
            let advanced = time > core.now;
            core.now = time;
            core.executed += 1;
            advanced
        };
        if advanced {
            self.fire(NotificationKind::TimeChanged, NotificationContent::None);
        }
        Self::event_log(format_args!("exec {event:?}"));

        let message = match panic::catch_unwind(AssertUnwindSafe(|| event.execute(self))) {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("panicked: {}", panic_message(payload)),
        };
        let err = SimRuntimeError {
            seq,
            time: time.to_string(),
            message,
        };
        tracing::error!(%err, "event action failed, aborting replication");
        Err(err)
    }

    fn finish(&self, reason: StopReason) {
        let now = {
            let mut core = self.core();
            core.set_state(SimState::Stopping);
            core.stop_requested = false;
            core.target = None;
            core.pace_bound = None;
            if reason.ends_replication() {
                core.replication_ended = true;
            }
            core.last_stop = Some(reason.clone());
            core.now
        };
        tracing::info!(%now, ?reason, "simulator stopped");
        self.fire(
            NotificationKind::Stopped,
            NotificationContent::Stop(reason.clone()),
        );
        if reason.ends_replication() {
            self.fire(
                NotificationKind::EndReplication,
                NotificationContent::Stop(reason),
            );
        }
        self.core().set_state(SimState::Stopped);
    }

    pub(crate) fn fire(&self, kind: NotificationKind, content: NotificationContent) {
        let subscribers = self
            .shared
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers(kind);
        if subscribers.is_empty() {
            return;
        }
        let (time, replication_id) = {
            let core = self.core();
            let id = core
                .replication
                .as_ref()
                .map(Replication::shared_id)
                .unwrap_or_else(|| Arc::from(""));
            (core.now, id)
        };
        let notification = Notification {
            kind,
            replication_id,
            time,
            content,
        };
        for listener in subscribers {
            listener.notify(&notification);
        }
    }

    /// Publish how far the run loop may advance; `None` lifts the bound.
    /// Ignored once the run loop is no longer running.
    pub(crate) fn set_pace_bound(&self, bound: Option<T>) {
        {
            let mut core = self.core();
            if !core.state.is_starting_or_running() {
                return;
            }
            core.pace_bound = bound;
        }
        self.shared.wake.notify_one();
    }

    #[cfg(feature = "event_tracing")]
    fn event_log(msg: fmt::Arguments<'_>) {
        tracing::trace!("{msg}");
    }

    #[cfg(not(feature = "event_tracing"))]
    fn event_log(_msg: fmt::Arguments<'_>) {}
}

impl<T: SimTime> Default for Simulator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SimTime> fmt::Debug for Simulator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core();
        f.debug_struct("Simulator")
            .field("state", &core.state)
            .field("now", &core.now)
            .field("pending", &core.queue.len())
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};

use crate::{
    error::SimError,
    notify::StopReason,
    simulator::{RunTarget, Simulator},
    time::SimTime,
};

const DEFAULT_TICK: Duration = Duration::from_millis(5);
const DEFAULT_LAG_WARNING: Duration = Duration::from_millis(100);

struct Clock<T> {
    speed: f64,
    anchor_wall: Instant,
    anchor_sim: T,
    lag: Duration,
}

impl<T: SimTime> Clock<T> {
    fn reanchor(&mut self, now: T) {
        self.anchor_wall = Instant::now();
        self.anchor_sim = now;
    }

    /// simulation time the wall clock has reached; `None` when unpaced
    fn bound(&self) -> Option<T> {
        if self.speed == 0.0 {
            return None;
        }
        let secs = self.anchor_wall.elapsed().as_secs_f64() * self.speed;
        Some(self.anchor_sim.add_duration(T::duration_from_secs_f64(secs)))
    }
}

/// Simulator paced against the wall clock.
///
/// A pacing task wakes every tick, works out how much simulation time
/// should have passed at the configured speed factor and lets the run
/// loop advance up to that time. It never executes events itself.
/// When actions overrun their wall-clock budget the simulation simply
/// falls behind; nothing is skipped and the delay shows up in [`lag`].
///
/// The speed factor counts simulated seconds per wall-clock second, so
/// 2.0 runs twice as fast as the wall clock. A factor of zero lifts
/// pacing altogether.
///
/// [`lag`]: RealTimeSimulator::lag
pub struct RealTimeSimulator<T: SimTime> {
    sim: Simulator<T>,
    clock: Arc<Mutex<Clock<T>>>,
    tick: Duration,
    lag_warning: Duration,
    pacer: Mutex<Option<JoinHandle<()>>>,
}

impl<T: SimTime> RealTimeSimulator<T> {
    pub fn new(sim: Simulator<T>) -> Self {
        let now = sim.now();
        Self {
            sim,
            clock: Arc::new(Mutex::new(Clock {
                speed: 1.0,
                anchor_wall: Instant::now(),
                anchor_sim: now,
                lag: Duration::ZERO,
            })),
            tick: DEFAULT_TICK,
            lag_warning: DEFAULT_LAG_WARNING,
            pacer: Mutex::new(None),
        }
    }

    pub fn with_speed(self, speed: f64) -> Result<Self, SimError> {
        validate_speed(speed)?;
        self.clock().speed = speed;
        Ok(self)
    }

    pub fn with_tick(mut self, tick: Duration) -> Result<Self, SimError> {
        if tick.is_zero() {
            return Err(SimError::InvalidArgument("pacing tick must be > 0".into()));
        }
        self.tick = tick;
        Ok(self)
    }

    /// lag above which a warning is logged
    pub fn with_lag_warning(mut self, threshold: Duration) -> Self {
        self.lag_warning = threshold;
        self
    }

    pub fn simulator(&self) -> &Simulator<T> {
        &self.sim
    }

    fn clock(&self) -> MutexGuard<'_, Clock<T>> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn speed_factor(&self) -> f64 {
        self.clock().speed
    }

    /// Change the pace. Takes effect from the current simulation time on.
    pub fn set_speed_factor(&self, speed: f64) -> Result<(), SimError> {
        validate_speed(speed)?;
        let bound = {
            let mut clock = self.clock();
            clock.speed = speed;
            clock.reanchor(self.sim.now());
            clock.bound()
        };
        if self.sim.is_starting_or_running() {
            self.sim.set_pace_bound(bound);
        }
        tracing::info!(speed, "speed factor changed");
        Ok(())
    }

    /// How far behind the wall clock the oldest pending event is.
    pub fn lag(&self) -> Duration {
        self.clock().lag
    }

    pub fn start(&self) -> Result<(), SimError> {
        self.begin(None)
    }

    pub fn run_up_to(&self, time: T) -> Result<(), SimError> {
        self.begin(Some(RunTarget::before(time)))
    }

    pub fn run_up_to_and_including(&self, time: T) -> Result<(), SimError> {
        self.begin(Some(RunTarget::including(time)))
    }

    pub async fn stop(&self) -> Result<StopReason, SimError> {
        let outcome = self.sim.stop().await;
        self.abort_pacer();
        outcome
    }

    pub async fn join(&self) -> Result<StopReason, SimError> {
        let outcome = self.sim.join().await;
        self.abort_pacer();
        outcome
    }

    fn abort_pacer(&self) {
        if let Some(pacer) = self
            .pacer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pacer.abort();
        }
    }

    fn begin(&self, target: Option<RunTarget<T>>) -> Result<(), SimError> {
        let runtime = Handle::try_current().map_err(|_| SimError::NoRuntime)?;
        let bound = {
            let mut clock = self.clock();
            clock.reanchor(self.sim.now());
            clock.lag = Duration::ZERO;
            clock.bound()
        };
        self.sim.launch(target, bound)?;

        let pacer = runtime.spawn(pace(
            self.sim.clone(),
            Arc::clone(&self.clock),
            self.tick,
            self.lag_warning,
        ));
        let previous = self
            .pacer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(pacer);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }
}

impl<T: SimTime> Drop for RealTimeSimulator<T> {
    // other handles may still be waiting on the run; it goes on unpaced
    fn drop(&mut self) {
        self.abort_pacer();
        self.sim.set_pace_bound(None);
    }
}

fn validate_speed(speed: f64) -> Result<(), SimError> {
    if speed.is_nan() || speed < 0.0 {
        return Err(SimError::InvalidArgument(format!(
            "speed factor must be >= 0, got {speed}"
        )));
    }
    Ok(())
}

async fn pace<T: SimTime>(
    sim: Simulator<T>,
    clock: Arc<Mutex<Clock<T>>>,
    tick: Duration,
    lag_warning: Duration,
) {
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut behind = false;
    let mut published: Option<T> = None;

    loop {
        ticker.tick().await;
        if !sim.is_starting_or_running() {
            break;
        }

        let (bound, speed) = {
            let clock = clock.lock().unwrap_or_else(PoisonError::into_inner);
            (clock.bound(), clock.speed)
        };
        let Some(bound) = bound else {
            sim.set_pace_bound(None);
            published = None;
            continue;
        };

        // events the run loop was already allowed to run a tick ago but
        // has not reached yet
        let lag = match (sim.next_event_time(), published) {
            (Some(next), Some(previous)) if next <= previous => {
                let secs = T::duration_as_secs_f64(bound.minus(next)) / speed;
                Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
            }
            _ => Duration::ZERO,
        };
        clock.lock().unwrap_or_else(PoisonError::into_inner).lag = lag;

        if lag > lag_warning && !behind {
            tracing::warn!(lag_ms = lag.as_millis() as u64, "simulation running behind wall clock");
        } else if lag <= lag_warning && behind {
            tracing::info!("simulation caught up with wall clock");
        }
        behind = lag > lag_warning;

        sim.set_pace_bound(Some(bound));
        published = Some(bound);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SimTimeDouble;

    #[test]
    fn rejects_bad_speed() {
        let rt = RealTimeSimulator::new(Simulator::<SimTimeDouble>::new());
        assert!(matches!(
            rt.set_speed_factor(-1.0),
            Err(SimError::InvalidArgument(_))
        ));
        assert!(rt.set_speed_factor(f64::NAN).is_err());
        assert!(rt.set_speed_factor(0.0).is_ok());
        assert_eq!(rt.speed_factor(), 0.0);
    }

    #[test]
    fn unpaced_clock_has_no_bound() {
        let clock = Clock {
            speed: 0.0,
            anchor_wall: Instant::now(),
            anchor_sim: SimTimeDouble::ZERO,
            lag: Duration::ZERO,
        };
        assert!(clock.bound().is_none());
    }

    #[test]
    fn bound_grows_with_speed() {
        let clock = Clock {
            speed: 1_000.0,
            anchor_wall: Instant::now() - Duration::from_millis(50),
            anchor_sim: SimTimeDouble::new(10.0).unwrap(),
            lag: Duration::ZERO,
        };
        let bound = clock.bound().unwrap();
        // at least 50ms * 1000 = 50 units past the anchor
        assert!(bound >= SimTimeDouble::new(60.0).unwrap());
    }
}

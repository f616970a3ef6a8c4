use std::sync::Arc;

use rand::{SeedableRng, rngs::StdRng};

use crate::{
    error::SimError,
    notify::{NotificationKind, SimListener, StopReason},
    replication::Replication,
    simulator::{Model, Simulator},
    time::SimTime,
};

/// Handed to the model factory once per replication.
pub struct ReplicationContext {
    pub index: u32,
    pub id: String,
    /// independent random stream, reproducible from the experiment seed
    pub rng: StdRng,
}

#[derive(Debug, Clone)]
pub struct ReplicationReport<T> {
    pub index: u32,
    pub id: String,
    pub outcome: StopReason,
    pub final_time: T,
    pub events_executed: u64,
}

impl<T> ReplicationReport<T> {
    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, StopReason::Aborted(_))
    }
}

/// Runs the replications of one descriptor back to back, each on a
/// fresh simulator with its own model instance.
pub struct Experiment<T: SimTime, F> {
    replication: Replication<T>,
    factory: F,
    seed: u64,
    listeners: Vec<(Vec<NotificationKind>, Arc<dyn SimListener<T>>)>,
}

impl<T, F, M> Experiment<T, F>
where
    T: SimTime,
    F: FnMut(ReplicationContext) -> M,
    M: Model<T>,
{
    pub fn new(replication: Replication<T>, factory: F) -> Self {
        Self {
            replication,
            factory,
            seed: 0,
            listeners: Vec::new(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// attach a listener to every replication's simulator
    pub fn with_listener(
        mut self,
        kinds: &[NotificationKind],
        listener: Arc<dyn SimListener<T>>,
    ) -> Self {
        self.listeners.push((kinds.to_vec(), listener));
        self
    }

    /// Run all replications. A replication aborted by a failing action
    /// is reported, the remaining ones still run.
    pub async fn run(&mut self) -> Result<Vec<ReplicationReport<T>>, SimError> {
        let runs = self.replication.number_of_replications();
        let mut reports = Vec::with_capacity(runs as usize);

        for index in 0..runs {
            let id = format!("{}.{index}", self.replication.id());
            let ctx = ReplicationContext {
                index,
                id: id.clone(),
                rng: StdRng::seed_from_u64(self.seed.wrapping_add(u64::from(index))),
            };
            let mut model = (self.factory)(ctx);

            let sim = Simulator::<T>::new();
            for (kinds, listener) in &self.listeners {
                sim.add_listener(kinds, Arc::clone(listener));
            }
            sim.initialize(self.replication.with_id(id.clone()), &mut model)?;
            sim.start()?;
            let outcome = match sim.join().await {
                Ok(reason) => reason,
                Err(SimError::Runtime(err)) => StopReason::Aborted(err),
                Err(e) => return Err(e),
            };

            tracing::info!(
                replication = %id,
                ?outcome,
                events = sim.events_executed(),
                "replication finished"
            );
            reports.push(ReplicationReport {
                index,
                id,
                outcome,
                final_time: sim.now(),
                events_executed: sim.events_executed(),
            });
        }
        Ok(reports)
    }
}

use evsim::{
    ActionError, Experiment, Model, Notification, NotificationKind, Priority, RealTimeSimulator,
    Replication, ReplicationContext, SimError, SimTimeDouble, Simulator,
};
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Exp};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use tracing::Level;

const MEAN_INTERARRIVAL: f64 = 1.0;
const MEAN_SERVICE: f64 = 0.8;

/// single server with a FIFO line in front of it
struct Station {
    rng: StdRng,
    interarrival: Exp<f64>,
    service: Exp<f64>,
    warmup: f64,
    line: VecDeque<f64>,
    busy: bool,
    served: u64,
    total_wait: f64,
}

impl Station {
    fn new(rng: StdRng, warmup: f64) -> Self {
        Self {
            rng,
            interarrival: Exp::new(1.0 / MEAN_INTERARRIVAL).unwrap(),
            service: Exp::new(1.0 / MEAN_SERVICE).unwrap(),
            warmup,
            line: VecDeque::new(),
            busy: false,
            served: 0,
            total_wait: 0.0,
        }
    }

    fn next_arrival(&mut self) -> f64 {
        self.interarrival.sample(&mut self.rng)
    }

    fn service_time(&mut self) -> f64 {
        self.service.sample(&mut self.rng)
    }

    fn mean_wait(&self) -> f64 {
        if self.served == 0 {
            0.0
        } else {
            self.total_wait / self.served as f64
        }
    }

    fn begin_service(&mut self, arrived: f64, now: f64) -> f64 {
        self.busy = true;
        if arrived >= self.warmup {
            self.served += 1;
            self.total_wait += now - arrived;
        }
        self.service_time()
    }
}

type Shared = Arc<Mutex<Station>>;

fn arrival(sim: &Simulator<SimTimeDouble>, station: Shared) -> Result<(), ActionError> {
    let now = sim.now().get();
    let (service, next) = {
        let mut st = station.lock().unwrap();
        let service = if st.busy {
            st.line.push_back(now);
            None
        } else {
            Some(st.begin_service(now, now))
        };
        (service, st.next_arrival())
    };
    if let Some(service) = service {
        let station = Arc::clone(&station);
        sim.schedule_after(service, Priority::NORMAL, move |s| departure(s, station))?;
    }
    sim.schedule_after(next, Priority::NORMAL, move |s| arrival(s, station))?;
    Ok(())
}

fn departure(sim: &Simulator<SimTimeDouble>, station: Shared) -> Result<(), ActionError> {
    let now = sim.now().get();
    let service = {
        let mut st = station.lock().unwrap();
        st.busy = false;
        st.line
            .pop_front()
            .map(|arrived| st.begin_service(arrived, now))
    };
    if let Some(service) = service {
        sim.schedule_after(service, Priority::NORMAL, move |s| departure(s, station))?;
    }
    Ok(())
}

struct SingleServer {
    station: Shared,
}

impl Model<SimTimeDouble> for SingleServer {
    fn construct_model(&mut self, sim: &Simulator<SimTimeDouble>) -> Result<(), SimError> {
        let first = self.station.lock().unwrap().next_arrival();
        let station = Arc::clone(&self.station);
        sim.schedule_after(first, Priority::NORMAL, move |s| arrival(s, station))?;
        Ok(())
    }
}

fn log_lifecycle(n: &Notification<SimTimeDouble>) {
    match n.stop_reason() {
        Some(reason) => tracing::info!("{} {:?} at {} ({:?})", n.replication_id, n.kind, n.time, reason),
        None => tracing::info!("{} {:?} at {}", n.replication_id, n.kind, n.time),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .init();

    // one paced run, 20 simulated seconds at 100x
    let station = Arc::new(Mutex::new(Station::new(StdRng::seed_from_u64(1), 0.0)));
    let sim = Simulator::<SimTimeDouble>::new();
    sim.add_listener(
        &[
            NotificationKind::Initialized,
            NotificationKind::Started,
            NotificationKind::Stopped,
            NotificationKind::EndReplication,
        ],
        Arc::new(log_lifecycle),
    );
    let replication = Replication::<SimTimeDouble>::builder("paced")
        .run_length(20.0)
        .build()
        .unwrap();
    sim.initialize(replication, &mut SingleServer { station: Arc::clone(&station) })
        .unwrap();

    let rt = RealTimeSimulator::new(sim).with_speed(100.0).unwrap();
    rt.start().unwrap();
    let reason = rt.join().await.unwrap();
    {
        let st = station.lock().unwrap();
        tracing::info!(
            "paced run ended ({:?}): served {}, mean wait {:.3}, lag {:?}",
            reason,
            st.served,
            st.mean_wait(),
            rt.lag()
        );
    }

    // three independent replications as fast as possible
    let replication = Replication::<SimTimeDouble>::builder("mm1")
        .warmup_period(100.0)
        .run_length(10_000.0)
        .number_of_replications(3)
        .build()
        .unwrap();
    let mut stations = Vec::new();
    let mut experiment = Experiment::new(replication, |ctx: ReplicationContext| {
        let station = Arc::new(Mutex::new(Station::new(ctx.rng, 100.0)));
        stations.push(Arc::clone(&station));
        SingleServer { station }
    })
    .with_seed(2024)
    .with_listener(&[NotificationKind::Warmup], Arc::new(log_lifecycle));

    let reports = experiment.run().await.unwrap();
    drop(experiment);
    for (report, station) in reports.iter().zip(&stations) {
        let st = station.lock().unwrap();
        tracing::info!(
            "{}: {:?} at {}, {} events, served {}, mean wait {:.3}",
            report.id,
            report.outcome,
            report.final_time,
            report.events_executed,
            st.served,
            st.mean_wait()
        );
    }
}

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use evsim::{
    ActionError, Priority, RealTimeSimulator, Replication, SimError, SimTimeDouble, Simulator,
    StopReason,
};
use tokio::time::timeout;

fn t(x: f64) -> SimTimeDouble {
    SimTimeDouble::new(x).unwrap()
}

/// simulator with one event per simulated second in `1..=last`
fn ticking(last: u32, count: &Arc<AtomicU64>) -> Simulator<SimTimeDouble> {
    let sim = Simulator::new();
    let rep = Replication::<SimTimeDouble>::builder("paced")
        .run_length(1e9)
        .build()
        .unwrap();
    sim.initialize(rep, &mut |s: &Simulator<SimTimeDouble>| -> Result<(), SimError> {
        for i in 1..=last {
            let count = Arc::clone(count);
            s.schedule_at(t(f64::from(i)), Priority::NORMAL, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })?;
        }
        Ok(())
    })
    .unwrap();
    sim
}

#[tokio::test]
async fn speed_factor_paces_the_run() {
    let count = Arc::new(AtomicU64::new(0));
    // 5 simulated seconds at 100x take about 50ms
    let rt = RealTimeSimulator::new(ticking(5, &count))
        .with_speed(100.0)
        .unwrap();

    let began = Instant::now();
    rt.start().unwrap();
    let reason = timeout(Duration::from_secs(5), rt.join()).await.unwrap();
    assert_eq!(reason.unwrap(), StopReason::EndOfEvents);
    assert!(began.elapsed() >= Duration::from_millis(40));
    assert_eq!(count.load(Ordering::SeqCst), 5);
    assert_eq!(rt.simulator().now(), t(5.0));
}

#[tokio::test]
async fn zero_speed_runs_flat_out() {
    let count = Arc::new(AtomicU64::new(0));
    let rt = RealTimeSimulator::new(ticking(10_000, &count))
        .with_speed(0.0)
        .unwrap();

    rt.start().unwrap();
    let reason = timeout(Duration::from_secs(5), rt.join()).await.unwrap();
    assert_eq!(reason.unwrap(), StopReason::EndOfEvents);
    assert_eq!(count.load(Ordering::SeqCst), 10_000);
}

#[tokio::test]
async fn dropping_to_zero_speed_mid_run_finishes_quickly() {
    let count = Arc::new(AtomicU64::new(0));
    let rt = RealTimeSimulator::new(ticking(1_000, &count));
    assert_eq!(rt.speed_factor(), 1.0);

    rt.start().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(count.load(Ordering::SeqCst) < 1_000);

    rt.set_speed_factor(0.0).unwrap();
    let reason = timeout(Duration::from_secs(5), rt.join()).await.unwrap();
    assert_eq!(reason.unwrap(), StopReason::EndOfEvents);
    assert_eq!(rt.simulator().now(), t(1_000.0));
}

#[tokio::test]
async fn stop_while_waiting_for_the_wall_clock() {
    let count = Arc::new(AtomicU64::new(0));
    let sim = Simulator::new();
    let rep = Replication::<SimTimeDouble>::builder("wait")
        .run_length(1_000.0)
        .build()
        .unwrap();
    let inner = Arc::clone(&count);
    sim.initialize(rep, &mut |s: &Simulator<SimTimeDouble>| -> Result<(), SimError> {
        let inner = Arc::clone(&inner);
        s.schedule_at(t(100.0), Priority::NORMAL, move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })?;
        Ok(())
    })
    .unwrap();
    let rt = RealTimeSimulator::new(sim);

    rt.start().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let reason = timeout(Duration::from_secs(1), rt.stop()).await.unwrap();
    assert_eq!(reason.unwrap(), StopReason::Requested);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(rt.simulator().queue_len(), 1);

    // without the wrapper the same simulator runs unpaced
    rt.simulator().start().unwrap();
    let reason = timeout(Duration::from_secs(1), rt.simulator().join())
        .await
        .unwrap();
    assert_eq!(reason.unwrap(), StopReason::EndOfEvents);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(rt.simulator().now(), t(100.0));
}

#[tokio::test]
async fn dropping_the_pacer_releases_other_handles() {
    let count = Arc::new(AtomicU64::new(0));
    let sim = ticking(0, &count);
    let inner = Arc::clone(&count);
    sim.schedule_at(t(1_000.0), Priority::NORMAL, move |_| {
        inner.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();

    // at real time the event would be 1000 seconds away
    let rt = RealTimeSimulator::new(sim.clone());
    rt.start().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    drop(rt);

    let reason = timeout(Duration::from_secs(2), sim.join()).await.unwrap();
    assert_eq!(reason.unwrap(), StopReason::EndOfEvents);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(sim.now(), t(1_000.0));
}

#[tokio::test]
async fn paced_run_up_to_stops_at_target() {
    let count = Arc::new(AtomicU64::new(0));
    let rt = RealTimeSimulator::new(ticking(5, &count))
        .with_speed(200.0)
        .unwrap();

    rt.run_up_to(t(3.0)).unwrap();
    let reason = timeout(Duration::from_secs(5), rt.join()).await.unwrap();
    assert_eq!(reason.unwrap(), StopReason::TargetReached);
    assert_eq!(rt.simulator().now(), t(3.0));
    assert_eq!(count.load(Ordering::SeqCst), 2);

    rt.run_up_to_and_including(t(3.0)).unwrap();
    let reason = timeout(Duration::from_secs(5), rt.join()).await.unwrap();
    assert_eq!(reason.unwrap(), StopReason::TargetReached);
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

fn slow(sim: &Simulator<SimTimeDouble>) -> Result<(), ActionError> {
    // far more wall time than one simulated second is worth at 1000x
    std::thread::sleep(Duration::from_millis(20));
    sim.schedule_after(1.0, Priority::NORMAL, slow)?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overrunning_actions_show_up_as_lag() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let sim = Simulator::new();
    let rep = Replication::<SimTimeDouble>::builder("slow")
        .run_length(1e9)
        .build()
        .unwrap();
    sim.initialize(rep, &mut |s: &Simulator<SimTimeDouble>| -> Result<(), SimError> {
        s.schedule_at(t(1.0), Priority::NORMAL, slow)?;
        Ok(())
    })
    .unwrap();
    let rt = RealTimeSimulator::new(sim)
        .with_speed(1_000.0)
        .unwrap()
        .with_lag_warning(Duration::from_millis(50));

    rt.start().unwrap();
    let deadline = Instant::now() + Duration::from_secs(3);
    while rt.lag() < Duration::from_millis(10) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(rt.lag() >= Duration::from_millis(10));

    let executed = rt.simulator().events_executed();
    assert_eq!(rt.stop().await.unwrap(), StopReason::Requested);
    // nothing was skipped to catch up: events ran one simulated second apart
    let now = rt.simulator().now();
    assert!(rt.simulator().events_executed() >= executed);
    assert_eq!(now, t(rt.simulator().events_executed() as f64));
}

#[tokio::test]
async fn rejects_bad_configuration() {
    let rt = RealTimeSimulator::new(Simulator::<SimTimeDouble>::new());
    assert!(matches!(
        rt.with_tick(Duration::ZERO),
        Err(SimError::InvalidArgument(_))
    ));
    let rt = RealTimeSimulator::new(Simulator::<SimTimeDouble>::new());
    assert!(rt.set_speed_factor(-2.0).is_err());
    // not initialized
    assert!(matches!(rt.start(), Err(SimError::InvalidState { .. })));
}

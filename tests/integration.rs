use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use stationd::clock;
use stationd::config::Settings;
use stationd::error::HostError;
use stationd::pool::{Work, WorkerPool};
use stationd::sched::{Scheduler, TimerCallback, TimerSpec};
use stationd::scm::{ServiceAction, ServiceControl, Tristate};

/// Inert controller so pool tests never touch the real service manager.
struct InertScm;

impl ServiceControl for InertScm {
    fn install(&self, _uninstall: bool) -> Result<(), HostError> {
        Ok(())
    }

    fn is_installed(&self) -> Tristate {
        Tristate::No
    }

    fn is_running(&self, _name: &str) -> Tristate {
        Tristate::Unknown
    }

    fn control(&self, _name: &str, _action: ServiceAction) -> Result<(), HostError> {
        Ok(())
    }

    fn stop_command(&self, name: &str) -> String {
        format!("echo stop {name}")
    }

    fn start_command(&self, name: &str) -> String {
        format!("echo start {name}")
    }
}

/// Polls `predicate` until it holds or `timeout` elapses.
fn wait_for(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    predicate()
}

struct CountingWork {
    calls: Vec<AtomicUsize>,
    /// Indexes whose work requests an immediate re-run.
    rerun_index: usize,
}

impl CountingWork {
    fn new(workers: usize, rerun_index: usize) -> Self {
        Self {
            calls: (0..workers).map(|_| AtomicUsize::new(0)).collect(),
            rerun_index,
        }
    }

    fn calls(&self, index: usize) -> usize {
        self.calls[index].load(Ordering::SeqCst)
    }
}

impl Work for CountingWork {
    fn work(&self, index: usize) -> bool {
        self.calls[index].fetch_add(1, Ordering::SeqCst);
        index == self.rerun_index
    }
}

#[test]
fn two_worker_liveness_and_bounded_stop() {
    let settings = Arc::new(Settings {
        thread_count: 2,
        intervals: vec![1, 2],
        wait_for_exit: 1_000,
        manager_cadence: 3_600,
        ..Settings::default()
    });
    let work = Arc::new(CountingWork::new(2, 1));
    let pool = WorkerPool::new(work.clone(), settings);

    pool.start_work(Arc::new(InertScm));
    thread::sleep(Duration::from_millis(3_200));

    // Worker 0 sleeps its 1 s interval between calls; worker 1 returns
    // true and never sleeps.
    assert!(work.calls(0) >= 2, "worker 0 made {} calls", work.calls(0));
    assert!(work.calls(1) >= 3, "worker 1 made {} calls", work.calls(1));

    let stop_started = Instant::now();
    pool.stop_work();
    assert!(
        stop_started.elapsed() <= Duration::from_millis(2_000),
        "stop took {:?}",
        stop_started.elapsed()
    );
    assert!(!pool.is_active(0));
    assert!(!pool.is_active(1));
    assert!(!pool.any_worker_alive());
}

#[test]
fn hung_worker_is_recycled_by_the_manager() {
    struct HangingWork {
        calls: AtomicUsize,
    }

    impl Work for HangingWork {
        fn work(&self, _index: usize) -> bool {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                // First iteration stalls well past max_active.
                thread::sleep(Duration::from_secs(3));
            }
            false
        }
    }

    let settings = Arc::new(Settings {
        thread_count: 1,
        intervals: vec![1],
        max_active: 1,
        manager_cadence: 1,
        wait_for_exit: 1_000,
        ..Settings::default()
    });
    let work = Arc::new(HangingWork {
        calls: AtomicUsize::new(0),
    });
    let pool = WorkerPool::new(work.clone(), Arc::clone(&settings));

    pool.start_work(Arc::new(InertScm));

    // The manager notices the stall, recycles the slot, and the fresh
    // worker gets a second call through.
    assert!(
        wait_for(Duration::from_secs(12), || {
            work.calls.load(Ordering::SeqCst) >= 2
        }),
        "stalled worker was never recycled"
    );
    assert!(pool.is_active(0));

    pool.stop_work();
}

#[test]
fn memory_threshold_materializes_the_restart_script() {
    let service_name = "stationd-it-mem";
    let settings = Arc::new(Settings {
        service_name: service_name.into(),
        thread_count: 1,
        intervals: vec![1],
        max_memory: 1, // any real process exceeds 1 MiB immediately
        manager_cadence: 1,
        wait_for_exit: 1_000,
        ..Settings::default()
    });
    let work = Arc::new(CountingWork::new(1, usize::MAX));
    let pool = WorkerPool::new(work, Arc::clone(&settings));

    pool.start_work(Arc::new(InertScm));

    assert!(
        wait_for(Duration::from_secs(8), || pool.shutting_down()),
        "memory threshold never tripped"
    );

    let script = std::env::temp_dir().join(format!("restart.{service_name}.sh"));
    assert!(
        wait_for(Duration::from_secs(15), || script.exists()),
        "restart script was not written"
    );
    let contents = std::fs::read_to_string(&script).unwrap();
    assert!(contents.contains(&format!("stop {service_name}")));
    assert!(contents.contains(&format!("start {service_name}")));

    pool.stop_work();
    let _ = std::fs::remove_file(script);
}

#[test]
fn relative_timer_spacing_is_at_least_one_period() {
    let completions: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&completions);
    let scheduler = Scheduler::named("it-relative");
    let handle = scheduler.schedule(
        TimerSpec::relative(10, 100),
        TimerCallback::shared(move || {
            sink.lock().unwrap().push(clock::precise_ms());
        }),
    );

    assert!(wait_for(Duration::from_secs(5), || {
        completions.lock().unwrap().len() >= 4
    }));
    handle.cancel();

    let stamps = completions.lock().unwrap();
    for pair in stamps.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= 100, "consecutive dispatches only {gap}ms apart");
    }
}

#[test]
fn absolute_timer_does_not_accumulate_drift() {
    const PERIOD: u64 = 300;
    const LATENCY: u64 = 120;

    let fires: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&fires);
    let anchor = clock::precise_ms() + PERIOD;
    let scheduler = Scheduler::named("it-absolute");
    let handle = scheduler.schedule(
        TimerSpec::absolute(anchor, PERIOD as i64),
        TimerCallback::shared(move || {
            sink.lock().unwrap().push(clock::precise_ms());
            // Callback latency that would shift a relative timer by
            // LATENCY per tick; an absolute one must stay anchored.
            thread::sleep(Duration::from_millis(LATENCY));
        }),
    );

    assert!(wait_for(Duration::from_secs(5), || {
        fires.lock().unwrap().len() >= 4
    }));
    handle.cancel();

    let stamps = fires.lock().unwrap();
    for (tick, stamp) in stamps.iter().enumerate() {
        let offset = stamp - anchor;
        let expected = tick as u64 * PERIOD;
        let jitter = offset.abs_diff(expected);
        assert!(
            jitter <= 75,
            "tick {tick} fired {offset}ms after anchor, expected {expected}ms"
        );
    }
}

#[test]
fn weak_timer_is_removed_once_its_owner_drops() {
    let hits = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&hits);
    let owner = Arc::new(move || {
        observed.fetch_add(1, Ordering::SeqCst);
    });

    let scheduler = Scheduler::named("it-weak");
    let handle = scheduler.schedule(TimerSpec::relative(10, 30), TimerCallback::weak(&owner));

    assert!(wait_for(Duration::from_secs(5), || {
        hits.load(Ordering::SeqCst) >= 1
    }));

    drop(owner);
    assert!(
        wait_for(Duration::from_secs(5), || !handle.is_scheduled()),
        "collected timer was never removed"
    );

    let frozen = hits.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(hits.load(Ordering::SeqCst), frozen, "inert timer still fired");
    assert_eq!(scheduler.timer_count(), 0);
}

#[test]
fn async_timer_never_overlaps_itself() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let fires = Arc::new(AtomicUsize::new(0));

    let flight = Arc::clone(&in_flight);
    let peak = Arc::clone(&max_seen);
    let count = Arc::clone(&fires);

    let scheduler = Scheduler::named("it-async");
    let handle = scheduler.schedule(
        TimerSpec::relative(0, 30).run_async(),
        TimerCallback::shared(move || {
            let current = flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(current, Ordering::SeqCst);
            // Dispatch cost well past the period, so the scheduler keeps
            // finding the timer due while a call is still in flight.
            thread::sleep(Duration::from_millis(150));
            flight.fetch_sub(1, Ordering::SeqCst);
            count.fetch_add(1, Ordering::SeqCst);
        }),
    );

    assert!(wait_for(Duration::from_secs(5), || {
        fires.load(Ordering::SeqCst) >= 3
    }));
    handle.cancel();

    assert_eq!(
        max_seen.load(Ordering::SeqCst),
        1,
        "timer overlapped itself"
    );
}

//! Non-reentrant timer scheduler.
//!
//! A named scheduler owns a set of timers and dispatches them from one
//! dedicated thread. Timers are relative (next fire measured from the
//! completion of the previous dispatch) or absolute (fires anchored to a
//! wall-clock instant, advancing by exact period multiples so drift never
//! accumulates). Timers marked `run_async` are invoked on a small shared
//! dispatch pool instead of the scheduler thread; a `calling` flag keeps
//! them non-reentrant.
//!
//! Callbacks may hold their target weakly: once the owner drops the last
//! strong reference, the timer goes inert and the scheduler removes it on
//! the next eligibility check. Schedulers themselves are process-wide and
//! never torn down.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, error};

use crate::clock;
use crate::wake::WakeEvent;

/// Sleep used when a scheduler has no timers at all.
const IDLE_SLEEP_MS: u64 = 60_000;

/// Number of threads in the shared async dispatch pool.
const DISPATCH_POOL_SIZE: usize = 2;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

type CallbackFn = dyn Fn() + Send + Sync;
type GateFn = dyn Fn() -> bool + Send + Sync;

thread_local! {
    static CURRENT: RefCell<Option<TimerHandle>> = const { RefCell::new(None) };
}

/// The timer currently dispatching on this thread, if any.
pub fn current_timer() -> Option<TimerHandle> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Outcome of one callback invocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Invoke {
    Called,
    Collected,
}

/// A timer callback, holding its target either strongly or weakly.
///
/// The weak form is for callbacks owned elsewhere: the scheduler never
/// extends the target's lifetime, and once the owner drops it the timer is
/// removed instead of fired.
pub enum TimerCallback {
    /// Always-alive callback (static functions, self-contained closures).
    Shared(Arc<CallbackFn>),
    /// Callback owned by someone else; inert once the owner drops it.
    Weak(Weak<CallbackFn>),
}

impl TimerCallback {
    /// Wraps a self-contained callback that lives as long as the timer.
    pub fn shared(f: impl Fn() + Send + Sync + 'static) -> Self {
        TimerCallback::Shared(Arc::new(f))
    }

    /// Holds `target` weakly; the caller keeps the `Arc` and controls the
    /// callback's lifetime through it.
    pub fn weak<F>(target: &Arc<F>) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let weak: Weak<F> = Arc::downgrade(target);
        TimerCallback::Weak(weak)
    }

    fn is_collected(&self) -> bool {
        matches!(self, TimerCallback::Weak(weak) if weak.strong_count() == 0)
    }

    fn invoke(&self) -> Invoke {
        match self {
            TimerCallback::Shared(f) => {
                f();
                Invoke::Called
            }
            TimerCallback::Weak(weak) => match weak.upgrade() {
                Some(f) => {
                    f();
                    Invoke::Called
                }
                None => Invoke::Collected,
            },
        }
    }
}

/// Construction parameters for a timer.
pub struct TimerSpec {
    due_ms: u64,
    anchor_ms: Option<u64>,
    period_ms: i64,
    run_async: bool,
    gate: Option<Arc<GateFn>>,
}

impl TimerSpec {
    /// A timer first due in `due_ms`, then re-armed `period_ms` after each
    /// dispatch completes. `period_ms <= 0` makes it one-shot.
    pub fn relative(due_ms: u64, period_ms: i64) -> Self {
        Self {
            due_ms,
            anchor_ms: None,
            period_ms,
            run_async: false,
            gate: None,
        }
    }

    /// A timer anchored to the wall-clock instant `anchor_ms` (epoch
    /// milliseconds), firing at exact period multiples from the anchor.
    pub fn absolute(anchor_ms: u64, period_ms: i64) -> Self {
        Self {
            due_ms: 0,
            anchor_ms: Some(anchor_ms),
            period_ms,
            run_async: false,
            gate: None,
        }
    }

    /// Run the callback on the shared dispatch pool instead of the
    /// scheduler thread.
    pub fn run_async(mut self) -> Self {
        self.run_async = true;
        self
    }

    /// Installs an eligibility gate consulted before every dispatch.
    pub fn gate(mut self, f: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.gate = Some(Arc::new(f));
        self
    }
}

struct TimerState {
    next_ms: u64,
    abs_next_ms: u64,
    has_set_next: bool,
    cost_ms: u64,
    fired: u64,
}

/// A scheduled timer. Owned by its scheduler until removal; handles held
/// by callers are observers plus control surface, not owners.
pub struct Timer {
    id: u64,
    period_ms: i64,
    absolutely: bool,
    run_async: bool,
    calling: AtomicBool,
    callback: TimerCallback,
    gate: Option<Arc<GateFn>>,
    state: Mutex<TimerState>,
    scheduler: Weak<Scheduler>,
}

impl Timer {
    fn next_ms(&self) -> u64 {
        self.state.lock().unwrap().next_ms
    }

    fn gate_open(&self) -> bool {
        self.gate.as_ref().is_none_or(|gate| gate())
    }

    fn record_cost(&self, elapsed_ms: u64) {
        let mut state = self.state.lock().unwrap();
        state.cost_ms = if state.fired == 0 {
            elapsed_ms
        } else {
            (state.cost_ms * 7 + elapsed_ms) / 8
        };
        state.fired += 1;
    }

    /// Advances the fire time after a dispatch completed at
    /// `completion_ms`. Returns whether a pending `set_next` override was
    /// consumed, which also keeps a one-shot timer alive for one more
    /// round.
    fn advance(&self, completion_ms: u64) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.has_set_next {
            state.has_set_next = false;
            return true;
        }
        if self.absolutely {
            // Exact period multiples from the anchor; may land in the past
            // when the scheduler is behind, in which case the next scan
            // fires it immediately and the schedule catches up without
            // accumulating drift.
            state.abs_next_ms = state.abs_next_ms.wrapping_add(self.period_ms.max(0) as u64);
            state.next_ms = state.abs_next_ms;
        } else if self.period_ms > 0 {
            state.next_ms = completion_ms + self.period_ms as u64;
        }
        false
    }
}

/// Cloneable control handle for a scheduled timer.
#[derive(Clone)]
pub struct TimerHandle(Arc<Timer>);

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Removes the timer from its scheduler. An in-flight dispatch
    /// completes and is then discarded.
    pub fn cancel(&self) {
        if let Some(scheduler) = self.0.scheduler.upgrade() {
            scheduler.remove(self.0.id);
        }
    }

    /// Overrides the next fire time to `now + ms` for one round, then
    /// wakes the scheduler so its sleep is re-evaluated.
    pub fn set_next(&self, ms: u64) {
        {
            let mut state = self.0.state.lock().unwrap();
            state.next_ms = clock::precise_ms() + ms;
            state.has_set_next = true;
        }
        if let Some(scheduler) = self.0.scheduler.upgrade() {
            scheduler.wake.set();
        }
    }

    /// Rolling average dispatch cost in milliseconds.
    pub fn cost_ms(&self) -> u64 {
        self.0.state.lock().unwrap().cost_ms
    }

    /// Number of completed dispatches.
    pub fn timers_fired(&self) -> u64 {
        self.0.state.lock().unwrap().fired
    }

    /// Whether the timer is still registered with its scheduler.
    pub fn is_scheduled(&self) -> bool {
        self.0
            .scheduler
            .upgrade()
            .is_some_and(|scheduler| scheduler.contains(self.0.id))
    }
}

/// A named timer scheduler with one dedicated dispatch thread.
pub struct Scheduler {
    name: String,
    timers: Mutex<HashMap<u64, Arc<Timer>>>,
    wake: WakeEvent,
}

static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<Scheduler>>>> = OnceLock::new();

impl Scheduler {
    /// Returns the scheduler registered under `name`, creating it (and its
    /// thread) on first reference. Schedulers live for the process.
    pub fn named(name: &str) -> Arc<Scheduler> {
        let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
        let mut map = registry.lock().unwrap();
        if let Some(scheduler) = map.get(name) {
            return Arc::clone(scheduler);
        }

        let scheduler = Arc::new(Scheduler {
            name: name.to_string(),
            timers: Mutex::new(HashMap::new()),
            wake: WakeEvent::new(),
        });
        let runner = Arc::clone(&scheduler);
        thread::Builder::new()
            .name(format!("sched-{name}"))
            .spawn(move || runner.run())
            .expect("failed to spawn scheduler thread");
        map.insert(name.to_string(), Arc::clone(&scheduler));
        scheduler
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a new timer and wakes the scheduler thread.
    pub fn schedule(self: &Arc<Self>, spec: TimerSpec, callback: TimerCallback) -> TimerHandle {
        let now = clock::precise_ms();
        let (next_ms, abs_next_ms, absolutely) = match spec.anchor_ms {
            Some(anchor) => (anchor, anchor, true),
            None => (now + spec.due_ms, 0, false),
        };

        let timer = Arc::new(Timer {
            id: NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed),
            period_ms: spec.period_ms,
            absolutely,
            run_async: spec.run_async,
            calling: AtomicBool::new(false),
            callback,
            gate: spec.gate,
            state: Mutex::new(TimerState {
                next_ms,
                abs_next_ms,
                has_set_next: false,
                cost_ms: 0,
                fired: 0,
            }),
            scheduler: Arc::downgrade(self),
        });

        self.timers
            .lock()
            .unwrap()
            .insert(timer.id, Arc::clone(&timer));
        self.wake.set();
        TimerHandle(timer)
    }

    /// Number of timers currently registered.
    pub fn timer_count(&self) -> usize {
        self.timers.lock().unwrap().len()
    }

    fn contains(&self, id: u64) -> bool {
        self.timers.lock().unwrap().contains_key(&id)
    }

    fn remove(&self, id: u64) {
        self.timers.lock().unwrap().remove(&id);
        self.wake.set();
    }

    fn run(self: Arc<Self>) {
        loop {
            let now = clock::precise_ms();
            let mut due = Vec::new();
            let mut next_due: Option<u64> = None;
            {
                let timers = self.timers.lock().unwrap();
                for timer in timers.values() {
                    let next = timer.next_ms();
                    if next <= now && timer.gate_open() {
                        due.push(Arc::clone(timer));
                    } else {
                        // Gated-but-due timers clamp to `now`, which turns
                        // into the minimum 1 ms sleep below.
                        let candidate = next.max(now);
                        next_due = Some(next_due.map_or(candidate, |c| c.min(candidate)));
                    }
                }
            }

            if due.is_empty() {
                let sleep_ms = next_due
                    .map(|next| (next - now).max(1))
                    .unwrap_or(IDLE_SLEEP_MS);
                self.wake.wait_timeout(Duration::from_millis(sleep_ms));
                continue;
            }

            for timer in due {
                self.dispatch(timer);
            }
        }
    }

    fn dispatch(self: &Arc<Self>, timer: Arc<Timer>) {
        // Non-reentrancy. Sync timers cannot get here while calling, since
        // this thread is the only dispatcher; the flag guards async timers
        // whose previous invocation is still on the pool.
        if timer.calling.load(Ordering::Acquire) {
            return;
        }

        if timer.callback.is_collected() {
            debug!("{}: timer {} target collected, removing", self.name, timer.id);
            self.remove(timer.id);
            return;
        }

        timer.calling.store(true, Ordering::Release);
        let started_ms = clock::precise_ms();

        if timer.run_async {
            let scheduler = Arc::clone(self);
            dispatch_pool().submit(Box::new(move || {
                let result = scheduler.invoke_guarded(&timer);
                scheduler.complete(&timer, started_ms, result);
            }));
        } else {
            let result = self.invoke_guarded(&timer);
            self.complete(&timer, started_ms, result);
        }
    }

    fn invoke_guarded(&self, timer: &Arc<Timer>) -> Invoke {
        CURRENT.with(|current| *current.borrow_mut() = Some(TimerHandle(Arc::clone(timer))));
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            timer.callback.invoke()
        }));
        CURRENT.with(|current| *current.borrow_mut() = None);

        match outcome {
            Ok(invoke) => invoke,
            Err(_) => {
                // Callback faults never unschedule the timer.
                error!("{}: timer {} callback panicked", self.name, timer.id);
                Invoke::Called
            }
        }
    }

    fn complete(&self, timer: &Arc<Timer>, started_ms: u64, result: Invoke) {
        let finished_ms = clock::precise_ms();
        timer.record_cost(finished_ms.saturating_sub(started_ms));
        let used_set_next = timer.advance(finished_ms);
        timer.calling.store(false, Ordering::Release);

        let one_shot_done = timer.period_ms <= 0 && !used_set_next;
        if result == Invoke::Collected || one_shot_done {
            self.remove(timer.id);
        }
        // Async completions re-arm from a pool thread; wake the scheduler
        // so its pending sleep accounts for the new fire time.
        self.wake.set();
    }
}

/// Schedules a one-shot async invocation of `f` after `ms` milliseconds on
/// the default scheduler.
pub fn delay(ms: u64, f: impl Fn() + Send + Sync + 'static) -> TimerHandle {
    Scheduler::named("Default").schedule(
        TimerSpec::relative(ms, 0).run_async(),
        TimerCallback::shared(f),
    )
}

type Job = Box<dyn FnOnce() + Send>;

struct DispatchPool {
    tx: Mutex<mpsc::Sender<Job>>,
}

impl DispatchPool {
    fn submit(&self, job: Job) {
        let _ = self.tx.lock().unwrap().send(job);
    }
}

static DISPATCH: OnceLock<DispatchPool> = OnceLock::new();

fn dispatch_pool() -> &'static DispatchPool {
    DISPATCH.get_or_init(|| {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        for index in 0..DISPATCH_POOL_SIZE {
            let rx = Arc::clone(&rx);
            thread::Builder::new()
                .name(format!("sched-pool-{index}"))
                .spawn(move || {
                    loop {
                        let job = rx.lock().unwrap().recv();
                        match job {
                            Ok(job) => job(),
                            Err(_) => return,
                        }
                    }
                })
                .expect("failed to spawn dispatch pool thread");
        }
        DispatchPool { tx: Mutex::new(tx) }
    })
}

//! Cached wall-clock reader.
//!
//! Hot paths (worker liveness stamps, manager staleness checks) read the
//! clock far more often than they need fresh values. The cache holds the
//! current time as a single atomic and is refreshed every 500 ms by a
//! relative timer on the default scheduler.
//!
//! The cache is an optimization only: anything that measures intervals
//! shorter than the refresh period (dispatch cost, drain budgets) must use
//! [`precise_ms`] instead.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::sched::{Scheduler, TimerCallback, TimerHandle, TimerSpec};

/// Cadence at which the cached timestamp is refreshed.
pub const REFRESH_MS: u64 = 500;

struct Clock {
    cached_ms: AtomicU64,
    // Held so the refresh timer stays visible to introspection; schedulers
    // own their timers, so dropping this would not cancel anything.
    _refresh: TimerHandle,
}

static CLOCK: OnceLock<Clock> = OnceLock::new();

fn global() -> &'static Clock {
    CLOCK.get_or_init(|| {
        let clock = Clock {
            cached_ms: AtomicU64::new(precise_ms()),
            _refresh: Scheduler::named("Default").schedule(
                TimerSpec::relative(REFRESH_MS, REFRESH_MS as i64),
                TimerCallback::shared(|| {
                    if let Some(clock) = CLOCK.get() {
                        clock.cached_ms.store(precise_ms(), Ordering::Relaxed);
                    }
                }),
            ),
        };
        clock
    })
}

/// Milliseconds since the Unix epoch, at most [`REFRESH_MS`] stale.
pub fn now_ms() -> u64 {
    global().cached_ms.load(Ordering::Relaxed)
}

/// The cached wall clock as a `SystemTime`.
pub fn now() -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(now_ms())
}

/// Milliseconds since the Unix epoch, read directly from the OS.
pub fn precise_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

//! Resettable single-shot wake event.
//!
//! Workers and schedulers sleep between iterations on one of these instead
//! of a plain timer so stop requests and on-demand runs can interrupt the
//! sleep immediately. `set` latches the signal; the next `wait_timeout`
//! consumes it.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A single-shot wake signal shared between one sleeper and any number of
/// wakers.
#[derive(Default)]
pub struct WakeEvent {
    signalled: Mutex<bool>,
    cv: Condvar,
}

impl WakeEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latches the signal and wakes the sleeper if it is waiting.
    pub fn set(&self) {
        let mut signalled = self.signalled.lock().unwrap();
        *signalled = true;
        self.cv.notify_all();
    }

    /// Blocks until the signal is set or `timeout` elapses. Consumes the
    /// signal on wake-up. Returns `true` if woken by `set`, `false` on
    /// timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signalled = self.signalled.lock().unwrap();
        loop {
            if *signalled {
                *signalled = false;
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, result) = self.cv.wait_timeout(signalled, remaining).unwrap();
            signalled = guard;
            if result.timed_out() && !*signalled {
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_times_out_without_signal() {
        let event = WakeEvent::new();
        let start = Instant::now();
        assert!(!event.wait_timeout(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn set_interrupts_wait() {
        let event = Arc::new(WakeEvent::new());
        let waker = event.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            waker.set();
        });

        let start = Instant::now();
        assert!(event.wait_timeout(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }

    #[test]
    fn signal_latches_until_consumed() {
        let event = WakeEvent::new();
        event.set();
        // A set issued before the wait still wakes it.
        assert!(event.wait_timeout(Duration::from_millis(10)));
        // The signal was consumed by the previous wait.
        assert!(!event.wait_timeout(Duration::from_millis(10)));
    }
}

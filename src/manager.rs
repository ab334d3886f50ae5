//! Manager loop.
//!
//! A single supervisor thread (`AM`) wakes once per cadence and runs the
//! checks in a fixed order: worker liveness, process memory, process
//! thread count, process uptime, then the watchdog pass. Liveness failures
//! are repaired in place by restarting the affected worker; the process
//! thresholds hand control to the restart orchestrator and end the loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, error, info, warn};

use crate::clock;
use crate::config::Settings;
use crate::pool::WorkerPool;
use crate::restart;
use crate::scm::ServiceControl;
use crate::wake::WakeEvent;
use crate::watchdog;

/// Join deadline when recycling a stalled worker.
const STALL_JOIN: Duration = Duration::from_secs(5);

/// Running manager loop; `stop` interrupts the cadence sleep and joins.
pub struct ManagerHandle {
    stop: Arc<AtomicBool>,
    wake: Arc<WakeEvent>,
    handle: JoinHandle<()>,
}

impl ManagerHandle {
    pub fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake.set();
        let _ = self.handle.join();
    }
}

/// Spawns the manager thread for `pool`.
pub(crate) fn spawn(pool: Arc<WorkerPool>, scm: Arc<dyn ServiceControl>) -> ManagerHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let wake = Arc::new(WakeEvent::new());

    let manager = Manager {
        settings: Arc::clone(pool.settings()),
        pool,
        scm,
        stop: Arc::clone(&stop),
        wake: Arc::clone(&wake),
    };
    let handle = thread::Builder::new()
        .name("AM".into())
        .spawn(move || manager.run())
        .expect("failed to spawn manager thread");

    ManagerHandle { stop, wake, handle }
}

struct Manager {
    settings: Arc<Settings>,
    pool: Arc<WorkerPool>,
    scm: Arc<dyn ServiceControl>,
    stop: Arc<AtomicBool>,
    wake: Arc<WakeEvent>,
}

impl Manager {
    fn run(&self) {
        info!("AM: manager started");
        let cadence = Duration::from_secs(self.settings.manager_cadence.max(1));

        loop {
            self.wake.wait_timeout(cadence);
            if self.stop.load(Ordering::SeqCst) {
                info!("AM: manager stopping");
                return;
            }

            self.check_active();
            if self.check_memory() || self.check_thread() || self.check_auto_restart() {
                // The restart orchestrator has taken over; nothing left to
                // supervise in this process.
                return;
            }
            self.spawn_watchdog_pass();
        }
    }

    /// Restarts workers whose thread died, and recycles workers that have
    /// not stamped `last_active` within `max_active` seconds.
    fn check_active(&self) {
        for index in 0..self.pool.thread_count() {
            if self.pool.shutting_down() || self.stop.load(Ordering::SeqCst) {
                return;
            }
            if !self.settings.worker_enabled(index) || !self.pool.is_active(index) {
                continue;
            }
            let name = self.settings.worker_name(index);

            if !self.pool.worker_alive(index) {
                warn!("AM: {name} terminated unexpectedly, restarting");
                if let Err(err) = self.pool.start_work_at(index) {
                    error!("AM: failed to restart {name}: {err}");
                }
                continue;
            }

            if self.settings.max_active == 0 {
                continue;
            }
            let idle_ms = clock::now_ms().saturating_sub(self.pool.last_active_ms(index));
            if idle_ms > self.settings.max_active * 1_000 {
                warn!(
                    "AM: {name} inactive for {}s (limit {}s), recycling",
                    idle_ms / 1_000,
                    self.settings.max_active
                );
                if let Err(err) = self.pool.stop_work_at(index) {
                    error!("AM: failed to stop {name}: {err}");
                    continue;
                }
                if !self.pool.join_worker(index, STALL_JOIN) {
                    warn!("AM: {name} still running, superseding it");
                }
                if let Err(err) = self.pool.start_work_at(index) {
                    error!("AM: failed to restart {name}: {err}");
                }
            }
        }
    }

    fn check_memory(&self) -> bool {
        if self.settings.max_memory == 0 {
            return false;
        }
        let Some(used_mib) = process_memory_mib() else {
            debug!("AM: process memory unavailable, skipping check");
            return false;
        };
        if used_mib <= self.settings.max_memory {
            return false;
        }
        error!(
            "AM: memory {used_mib} MiB exceeds limit {} MiB",
            self.settings.max_memory
        );
        self.trigger_restart("memory limit exceeded");
        true
    }

    fn check_thread(&self) -> bool {
        if self.settings.max_thread == 0 {
            return false;
        }
        let Some(threads) = process_thread_count() else {
            debug!("AM: process thread count unavailable, skipping check");
            return false;
        };
        if threads <= self.settings.max_thread {
            return false;
        }
        error!(
            "AM: {threads} threads exceed limit {}",
            self.settings.max_thread
        );
        self.trigger_restart("thread limit exceeded");
        true
    }

    fn check_auto_restart(&self) -> bool {
        if self.settings.auto_restart == 0 {
            return false;
        }
        let uptime_min = clock::now_ms().saturating_sub(self.pool.started_at_ms()) / 60_000;
        if uptime_min <= self.settings.auto_restart {
            return false;
        }
        info!(
            "AM: uptime {uptime_min}min past limit {}min",
            self.settings.auto_restart
        );
        self.trigger_restart("scheduled restart");
        true
    }

    fn trigger_restart(&self, reason: &str) {
        restart::trigger(&self.pool, &self.settings, self.scm.as_ref(), reason);
    }

    /// Runs the watchdog pass on its own thread so a slow service
    /// controller cannot delay the manager cadence.
    fn spawn_watchdog_pass(&self) {
        let peers = watchdog::parse_peers(&self.settings.watch_dog);
        if peers.is_empty() {
            return;
        }
        let scm = Arc::clone(&self.scm);
        thread::spawn(move || {
            watchdog::check(scm.as_ref(), &peers);
        });
    }
}

/// Resident memory of this process in MiB.
fn process_memory_mib() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    let process = system.process(pid)?;
    Some(process.memory() / (1024 * 1024))
}

/// Thread count of this process, from `/proc/self/status`.
fn process_thread_count() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("Threads:"))
        .and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_own_thread_count() {
        let threads = process_thread_count().expect("proc status should parse");
        assert!(threads >= 1);
    }

    #[test]
    fn reads_own_memory() {
        let mib = process_memory_mib().expect("own process should be visible");
        assert!(mib > 0);
    }
}

//! Worker pool.
//!
//! A pool runs N long-lived workers. Each worker repeatedly calls the
//! host-supplied work function, stamps its liveness timestamp on both
//! sides of the call, then sleeps on its wake event for its configured
//! interval. Stops are cooperative: clearing the `active` flag and setting
//! the wake event makes the loop exit at its next check, so work functions
//! must not block forever if they want bounded shutdown.
//!
//! Restarting a slot bumps its epoch. A superseded worker that is still
//! draining sees the epoch mismatch and exits even though the slot is
//! active again, which keeps exactly one live loop per slot.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::clock;
use crate::config::Settings;
use crate::error::HostError;
use crate::manager::{self, ManagerHandle};
use crate::scm::ServiceControl;
use crate::wake::WakeEvent;

/// Host-supplied work.
pub trait Work: Send + Sync + 'static {
    /// One unit of work for worker `index`. Return `true` to request an
    /// immediate re-run without sleeping.
    fn work(&self, index: usize) -> bool;

    /// Preflight dependency check for worker `index`. A worker whose check
    /// fails is simply not started; the rest of the pool runs normally.
    fn ready(&self, _index: usize) -> bool {
        true
    }
}

struct WorkerSlot {
    active: AtomicBool,
    last_active_ms: AtomicU64,
    epoch: AtomicU64,
    wake: WakeEvent,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerSlot {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            last_active_ms: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            wake: WakeEvent::new(),
            handle: Mutex::new(None),
        }
    }
}

/// A pool of supervised workers plus the manager that watches them.
pub struct WorkerPool {
    work: Arc<dyn Work>,
    settings: Arc<Settings>,
    slots: Vec<WorkerSlot>,
    shutting_down: AtomicBool,
    started_at_ms: AtomicU64,
    manager: Mutex<Option<ManagerHandle>>,
}

impl WorkerPool {
    pub fn new(work: Arc<dyn Work>, settings: Arc<Settings>) -> Arc<WorkerPool> {
        let slots = (0..settings.thread_count).map(|_| WorkerSlot::new()).collect();
        Arc::new(WorkerPool {
            work,
            settings,
            slots,
            shutting_down: AtomicBool::new(false),
            started_at_ms: AtomicU64::new(0),
            manager: Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn thread_count(&self) -> usize {
        self.slots.len()
    }

    /// Starts every enabled worker that passes its preflight check, then
    /// the manager loop. Individual start failures are logged; the pool
    /// runs with whatever started.
    pub fn start_work(self: &Arc<Self>, scm: Arc<dyn ServiceControl>) {
        self.shutting_down.store(false, Ordering::SeqCst);
        self.started_at_ms.store(clock::now_ms(), Ordering::SeqCst);

        for index in 0..self.slots.len() {
            let name = self.settings.worker_name(index);
            if !self.settings.worker_enabled(index) {
                info!("{name}: disabled by negative interval, not starting");
                continue;
            }
            if !self.work.ready(index) {
                warn!("{name}: preflight check failed, not starting");
                continue;
            }
            if let Err(err) = self.start_work_at(index) {
                error!("{name}: failed to start: {err}");
            }
        }

        let manager = manager::spawn(Arc::clone(self), scm);
        *self.manager.lock().unwrap() = Some(manager);
    }

    /// Starts worker `index`. The previous occupant of the slot, if any,
    /// is superseded: it exits at its next loop check. Callers that need
    /// the old worker gone first should use `stop_work_at` + `join_worker`.
    pub fn start_work_at(self: &Arc<Self>, index: usize) -> Result<(), HostError> {
        let slot = self.slots.get(index).ok_or(HostError::InvalidWorkerIndex {
            index,
            count: self.slots.len(),
        })?;

        let epoch = slot.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        slot.active.store(true, Ordering::SeqCst);
        slot.last_active_ms.store(clock::now_ms(), Ordering::SeqCst);

        let name = self.settings.worker_name(index);
        let pool = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || pool.worker_loop(index, epoch))?;
        *slot.handle.lock().unwrap() = Some(handle);
        info!("{name}: worker started");
        Ok(())
    }

    fn worker_loop(&self, index: usize, epoch: u64) {
        let slot = &self.slots[index];
        let name = self.settings.worker_name(index);

        loop {
            slot.last_active_ms.store(clock::now_ms(), Ordering::SeqCst);
            let rerun = match catch_unwind(AssertUnwindSafe(|| self.work.work(index))) {
                Ok(rerun) => rerun,
                Err(_) => {
                    error!("{name}: work faulted, continuing");
                    false
                }
            };
            slot.last_active_ms.store(clock::now_ms(), Ordering::SeqCst);

            if self.shutting_down.load(Ordering::SeqCst) {
                info!("{name}: pool shutting down, worker exiting");
                return;
            }

            let period_ms = self.settings.interval_ms(index).max(0) as u64;
            if !rerun {
                slot.wake.wait_timeout(Duration::from_millis(period_ms));
            }

            if !slot.active.load(Ordering::SeqCst) || slot.epoch.load(Ordering::SeqCst) != epoch {
                info!("{name}: stop requested, worker exiting");
                return;
            }
        }
    }

    /// Stops the manager, then every worker: clears the active flags, wakes
    /// the sleepers, and joins each with the configured deadline. Workers
    /// still alive past their deadline are detached and logged.
    pub fn stop_work(&self) {
        if let Some(manager) = self.manager.lock().unwrap().take() {
            manager.stop();
        }

        for slot in &self.slots {
            slot.active.store(false, Ordering::SeqCst);
            slot.wake.set();
        }

        let deadline = Duration::from_millis(self.settings.wait_for_exit);
        for index in 0..self.slots.len() {
            let name = self.settings.worker_name(index);
            let handle = self.slots[index].handle.lock().unwrap().take();
            let Some(handle) = handle else { continue };
            if !join_with_deadline(handle, deadline) {
                warn!(
                    "{name}: did not exit within {}ms, detaching",
                    self.settings.wait_for_exit
                );
            }
        }
    }

    /// Requests worker `index` to stop without joining it. The caller owns
    /// any work still in flight.
    pub fn stop_work_at(&self, index: usize) -> Result<(), HostError> {
        let slot = self.slots.get(index).ok_or(HostError::InvalidWorkerIndex {
            index,
            count: self.slots.len(),
        })?;
        slot.active.store(false, Ordering::SeqCst);
        slot.wake.set();
        Ok(())
    }

    /// Runs worker `index`'s work function once, synchronously, outside the
    /// worker loop. Used by step mode and the console.
    pub fn run_once(&self, index: usize) -> Result<bool, HostError> {
        if index >= self.slots.len() {
            return Err(HostError::InvalidWorkerIndex {
                index,
                count: self.slots.len(),
            });
        }
        match catch_unwind(AssertUnwindSafe(|| self.work.work(index))) {
            Ok(rerun) => Ok(rerun),
            Err(_) => {
                error!("{}: work faulted during single step", self.settings.worker_name(index));
                Ok(false)
            }
        }
    }

    /// Wakes worker `index` for an immediate on-demand iteration.
    pub fn wake_worker(&self, index: usize) -> Result<(), HostError> {
        let slot = self.slots.get(index).ok_or(HostError::InvalidWorkerIndex {
            index,
            count: self.slots.len(),
        })?;
        slot.wake.set();
        Ok(())
    }

    /// Joins worker `index` with a deadline. Returns whether it exited.
    pub fn join_worker(&self, index: usize, timeout: Duration) -> bool {
        let handle = match self.slots.get(index) {
            Some(slot) => slot.handle.lock().unwrap().take(),
            None => None,
        };
        match handle {
            Some(handle) => join_with_deadline(handle, timeout),
            None => true,
        }
    }

    pub fn is_active(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .is_some_and(|slot| slot.active.load(Ordering::SeqCst))
    }

    /// Whether worker `index`'s thread is still running.
    pub fn worker_alive(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(|slot| {
            slot.handle
                .lock()
                .unwrap()
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
        })
    }

    pub fn any_worker_alive(&self) -> bool {
        (0..self.slots.len()).any(|index| self.worker_alive(index))
    }

    /// Last liveness stamp of worker `index`, in epoch milliseconds.
    pub fn last_active_ms(&self, index: usize) -> u64 {
        self.slots
            .get(index)
            .map(|slot| slot.last_active_ms.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms.load(Ordering::SeqCst)
    }

    pub fn shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Marks the pool as shutting down. Monotonic; only the restart
    /// orchestrator sets this, and workers exit at their next check.
    pub fn set_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }
}

/// Polls a join handle until it finishes or the deadline passes. A worker
/// that panicked is treated as exited; the panic was already logged by the
/// loop's catch.
fn join_with_deadline(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    let _ = handle.join();
    true
}

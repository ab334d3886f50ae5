//! Supervised multi-worker service host with an embedded non-reentrant
//! timer scheduler.

#![warn(unused_crate_dependencies)]
// These dependencies are only used in the binary (src/bin/main.rs)
// Test dependencies are only used in test code
#[cfg(test)]
use assert_cmd as _;
use ctrlc as _;
#[cfg(test)]
use predicates as _;
#[cfg(test)]
use tempfile as _;
use tracing_subscriber as _;

/// CLI parsing.
pub mod cli;

/// Cached wall clock.
pub mod clock;

/// Settings loading.
pub mod config;

/// Interactive operator console.
pub mod console;

/// Errors.
pub mod error;

/// Manager loop.
pub mod manager;

/// Worker pool.
pub mod pool;

/// Restart orchestration.
pub mod restart;

/// Timer scheduler.
pub mod sched;

/// Service controller interface.
pub mod scm;

/// Status reporting.
pub mod status;

/// Resettable wake events.
pub mod wake;

/// Peer service watchdog.
pub mod watchdog;

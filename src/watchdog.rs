//! Watchdog over peer services.
//!
//! The host keeps a configured list of peer services running: any peer
//! whose controller state is exactly "not running" gets a start request.
//! An `unknown` state produces no action; the watchdog never acts on
//! uncertainty.

use tracing::{debug, info, warn};

use crate::scm::{ServiceAction, ServiceControl, Tristate};

/// Splits the configured `watch_dog` value into peer service names.
/// Accepts commas and semicolons as separators, ignoring empty segments.
pub fn parse_peers(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(String::from)
        .collect()
}

/// Runs one watchdog pass and returns how many start requests were issued.
pub fn check(scm: &dyn ServiceControl, peers: &[String]) -> usize {
    let mut started = 0;
    for peer in peers {
        match scm.is_running(peer) {
            Tristate::Yes => debug!("AM: watchdog: '{peer}' is running"),
            Tristate::Unknown => {
                debug!("AM: watchdog: state of '{peer}' unknown, leaving it alone")
            }
            Tristate::No => {
                info!("AM: watchdog: '{peer}' is down, starting it");
                match scm.control(peer, ServiceAction::Start) {
                    Ok(()) => started += 1,
                    Err(err) => warn!("AM: watchdog: failed to start '{peer}': {err}"),
                }
            }
        }
    }
    started
}

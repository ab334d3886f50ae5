//! Status reporting.
//!
//! Collects a point-in-time snapshot of the host (identity, controller
//! states, pool liveness) and renders it as a bordered text block for the
//! console and CLI surfaces.

use chrono::Local;

use crate::clock;
use crate::config::Settings;
use crate::pool::WorkerPool;
use crate::scm::{ServiceControl, Tristate};

/// Liveness view of a single worker slot.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub name: String,
    pub enabled: bool,
    pub active: bool,
    /// Seconds since the worker last stamped its liveness timestamp.
    pub idle_secs: Option<u64>,
}

/// Point-in-time snapshot of the host.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub service_name: String,
    pub display_name: String,
    pub description: String,
    pub version: String,
    pub installed: Tristate,
    pub running: Tristate,
    pub uptime_secs: Option<u64>,
    pub workers: Vec<WorkerStatus>,
}

/// Gathers a snapshot. `pool` is `None` when no pool is running in this
/// process (e.g. console status of an installed service).
pub fn collect(
    settings: &Settings,
    scm: &dyn ServiceControl,
    pool: Option<&WorkerPool>,
) -> StatusReport {
    let now = clock::now_ms();
    let workers = (0..settings.thread_count)
        .map(|index| {
            let (active, idle_secs) = match pool {
                Some(pool) => {
                    let stamp = pool.last_active_ms(index);
                    let idle = (stamp > 0).then(|| now.saturating_sub(stamp) / 1_000);
                    (pool.is_active(index), idle)
                }
                None => (false, None),
            };
            WorkerStatus {
                name: settings.worker_name(index),
                enabled: settings.worker_enabled(index),
                active,
                idle_secs,
            }
        })
        .collect();

    StatusReport {
        service_name: settings.service_name.clone(),
        display_name: settings.display_name.clone(),
        description: settings.description.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        installed: scm.is_installed(),
        running: scm.is_running(&settings.service_name),
        uptime_secs: pool.map(|pool| now.saturating_sub(pool.started_at_ms()) / 1_000),
        workers,
    }
}

const WIDTH: usize = 58;

fn banner(text: &str) -> String {
    let text: String = text.chars().take(WIDTH).collect();
    let pad = WIDTH - text.chars().count();
    let left = pad / 2;
    format!("|{}{}{}|", " ".repeat(left), text, " ".repeat(pad - left))
}

fn row(label: &str, value: &str) -> String {
    let line = format!(" {label:<12} {value}");
    let len = line.chars().count();
    if len >= WIDTH {
        let truncated: String = line.chars().take(WIDTH - 3).collect();
        format!("|{truncated}...|")
    } else {
        format!("|{line}{}|", " ".repeat(WIDTH - len))
    }
}

/// Renders the snapshot as a bordered block.
pub fn render(report: &StatusReport) -> String {
    let border = format!("+{}+", "=".repeat(WIDTH));
    let thin = format!("+{}+", "-".repeat(WIDTH));
    let captured = Local::now().format("%Y-%m-%d %H:%M:%S");

    let mut out = Vec::new();
    out.push(border.clone());
    out.push(banner(&format!(
        "{} v{}",
        report.display_name, report.version
    )));
    out.push(banner(&format!("captured at {captured}")));
    out.push(thin.clone());
    out.push(row("service", &report.service_name));
    if !report.description.is_empty() {
        out.push(row("description", &report.description));
    }
    out.push(row("installed", &report.installed.to_string()));
    out.push(row("running", &report.running.to_string()));
    if let Some(uptime) = report.uptime_secs {
        out.push(row("uptime", &format_secs(uptime)));
    }
    out.push(thin);
    for worker in &report.workers {
        let state = if !worker.enabled {
            "disabled".to_string()
        } else if !worker.active {
            "stopped".to_string()
        } else {
            match worker.idle_secs {
                Some(idle) => format!("active, idle {}", format_secs(idle)),
                None => "active".to_string(),
            }
        };
        out.push(row(&worker.name, &state));
    }
    out.push(border);
    out.join("\n")
}

fn format_secs(total: u64) -> String {
    if total < 60 {
        format!("{total}s")
    } else if total < 3_600 {
        format!("{}m{}s", total / 60, total % 60)
    } else {
        format!("{}h{}m", total / 3_600, (total % 3_600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scm::tests::MockScm;

    #[test]
    fn report_covers_every_worker_slot() {
        let settings = Settings {
            thread_count: 3,
            intervals: vec![1, -1],
            ..Settings::default()
        };
        let report = collect(&settings, &MockScm::default(), None);

        assert_eq!(report.workers.len(), 3);
        assert!(report.workers[0].enabled);
        assert!(!report.workers[1].enabled);
        assert_eq!(report.workers[2].name, "A2");
        assert_eq!(report.running, Tristate::Unknown);
    }

    #[test]
    fn rendered_block_is_uniform_width() {
        let settings = Settings::default();
        let report = collect(&settings, &MockScm::default(), None);
        let rendered = render(&report);

        let widths: Vec<usize> = rendered.lines().map(|line| line.chars().count()).collect();
        assert!(widths.iter().all(|width| *width == widths[0]));
        assert!(rendered.contains("stationd"));
    }

    #[test]
    fn durations_format_humanely() {
        assert_eq!(format_secs(59), "59s");
        assert_eq!(format_secs(61), "1m1s");
        assert_eq!(format_secs(3_700), "1h1m");
    }
}

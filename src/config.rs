use crate::error::HostError;
use serde::Deserialize;
use std::path::Path;

/// Process-wide host settings.
///
/// Every field is optional in the settings file; absent fields take the
/// defaults below. A threshold of `0` disables the corresponding check.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Name the host is registered under with the service controller.
    pub service_name: String,
    /// Human-readable name shown by the status printer and the controller.
    pub display_name: String,
    /// Free-form description shown by the status printer.
    pub description: String,
    /// Per-worker join deadline on stop, in milliseconds.
    pub wait_for_exit: u64,
    /// Worker inactivity threshold in seconds before the manager restarts it.
    pub max_active: u64,
    /// Process memory ceiling in MiB before a full restart is triggered.
    pub max_memory: u64,
    /// Process thread-count ceiling before a full restart is triggered.
    pub max_thread: u64,
    /// Process uptime ceiling in minutes before a full restart is triggered.
    pub auto_restart: u64,
    /// Comma/semicolon-delimited peer service names the watchdog keeps running.
    pub watch_dog: String,
    /// Number of logical workers in the pool.
    pub thread_count: usize,
    /// Per-worker period in seconds; workers past the end of the list fall
    /// back to the last entry. A negative interval disables that worker
    /// entirely.
    pub intervals: Vec<i64>,
    /// Optional per-worker names; workers past the end get `A<index>`.
    pub thread_names: Vec<String>,
    /// Seconds between manager passes.
    pub manager_cadence: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_name: "stationd".into(),
            display_name: "Station Daemon".into(),
            description: String::new(),
            wait_for_exit: 5_000,
            max_active: 0,
            max_memory: 0,
            max_thread: 0,
            auto_restart: 0,
            watch_dog: String::new(),
            thread_count: 1,
            intervals: vec![60],
            thread_names: Vec::new(),
            manager_cadence: 60,
        }
    }
}

impl Settings {
    /// Returns the period for worker `index` in milliseconds, applying the
    /// fallback rule: workers past the end of the list reuse the last entry,
    /// and an empty list means the default of 60 s.
    pub fn interval_ms(&self, index: usize) -> i64 {
        match self.intervals.get(index.min(self.intervals.len().saturating_sub(1))) {
            Some(secs) => secs * 1_000,
            None => 60_000,
        }
    }

    /// Whether worker `index` is enabled at all. A negative configured
    /// interval marks the worker as never-started.
    pub fn worker_enabled(&self, index: usize) -> bool {
        self.interval_ms(index) >= 0
    }

    /// Returns the display name for worker `index`; defaults to `A<index>`.
    pub fn worker_name(&self, index: usize) -> String {
        match self.thread_names.get(index) {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("A{index}"),
        }
    }
}

/// Loads the settings file.
///
/// A missing file at the default location is not an error: the host runs
/// with defaults. A file that exists but does not parse is fatal; the
/// caller is expected to exit non-zero.
pub fn load_settings(path: &str) -> Result<Settings, HostError> {
    let path = Path::new(path);
    if !path.exists() {
        tracing::info!("No settings file at {:?}; using defaults", path);
        return Ok(Settings::default());
    }

    let content = std::fs::read_to_string(path).map_err(HostError::ConfigRead)?;
    let settings: Settings = serde_yaml::from_str(&content)?;
    Ok(settings)
}

//! Service controller interface.
//!
//! The host consumes the OS service controller through a thin trait so the
//! manager, watchdog, and console stay testable. The shipped
//! implementation drives systemd through `systemctl`; states it cannot
//! determine are reported as `Unknown` and callers must never act on them.

use std::path::PathBuf;
use std::process::Command;

use strum::Display;
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::HostError;

/// Answer to a state query that may not be determinable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Tristate {
    Yes,
    No,
    Unknown,
}

/// A control request against a named service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
}

/// Operations the host needs from the OS service controller.
pub trait ServiceControl: Send + Sync {
    /// Registers (or with `uninstall` removes) this host's own service.
    fn install(&self, uninstall: bool) -> Result<(), HostError>;

    /// Whether this host's own service is registered.
    fn is_installed(&self) -> Tristate;

    /// Whether the named service is currently running.
    fn is_running(&self, name: &str) -> Tristate;

    /// Issues a start or stop request for the named service.
    fn control(&self, name: &str, action: ServiceAction) -> Result<(), HostError>;

    /// Shell line that stops the named service, for the restart script.
    fn stop_command(&self, name: &str) -> String;

    /// Shell line that starts the named service, for the restart script.
    fn start_command(&self, name: &str) -> String;
}

/// systemd-backed controller.
pub struct SystemdControl {
    service: String,
    display_name: String,
    description: String,
    unit_dir: PathBuf,
}

impl SystemdControl {
    pub fn new(settings: &Settings) -> Self {
        Self {
            service: settings.service_name.clone(),
            display_name: settings.display_name.clone(),
            description: settings.description.clone(),
            unit_dir: PathBuf::from("/etc/systemd/system"),
        }
    }

    fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(format!("{}.service", self.service))
    }

    fn unit_file(&self) -> String {
        let exe = std::env::current_exe()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|_| "stationd".into());
        let description = if self.description.is_empty() {
            &self.display_name
        } else {
            &self.description
        };
        format!(
            "[Unit]\nDescription={description}\n\n[Service]\nExecStart={exe} service\n\n[Install]\nWantedBy=multi-user.target\n"
        )
    }

    fn systemctl(&self, args: &[&str]) -> Result<(), HostError> {
        let status = Command::new("systemctl")
            .args(args)
            .status()
            .map_err(|err| HostError::Scm {
                service: self.service.clone(),
                reason: format!("systemctl {}: {err}", args.join(" ")),
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(HostError::Scm {
                service: self.service.clone(),
                reason: format!("systemctl {} exited with {status}", args.join(" ")),
            })
        }
    }
}

impl ServiceControl for SystemdControl {
    fn install(&self, uninstall: bool) -> Result<(), HostError> {
        let unit = self.unit_path();
        if uninstall {
            info!("Uninstalling service '{}'", self.service);
            self.systemctl(&["disable", "--now", &self.service])?;
            std::fs::remove_file(&unit)?;
        } else {
            info!("Installing service '{}' at {:?}", self.service, unit);
            std::fs::write(&unit, self.unit_file())?;
            self.systemctl(&["daemon-reload"])?;
            self.systemctl(&["enable", &self.service])?;
            return Ok(());
        }
        self.systemctl(&["daemon-reload"])
    }

    fn is_installed(&self) -> Tristate {
        match self.unit_path().try_exists() {
            Ok(true) => Tristate::Yes,
            Ok(false) => Tristate::No,
            Err(_) => Tristate::Unknown,
        }
    }

    fn is_running(&self, name: &str) -> Tristate {
        match Command::new("systemctl")
            .args(["is-active", "--quiet", name])
            .status()
        {
            Ok(status) if status.success() => Tristate::Yes,
            Ok(_) => Tristate::No,
            Err(err) => {
                debug!("systemctl is-active {name} failed: {err}");
                Tristate::Unknown
            }
        }
    }

    fn control(&self, name: &str, action: ServiceAction) -> Result<(), HostError> {
        info!("Requesting {action} of service '{name}'");
        let action = action.to_string();
        let status = Command::new("systemctl")
            .args([action.as_str(), name])
            .status()
            .map_err(|err| HostError::Scm {
                service: name.to_string(),
                reason: err.to_string(),
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(HostError::Scm {
                service: name.to_string(),
                reason: format!("systemctl {action} exited with {status}"),
            })
        }
    }

    fn stop_command(&self, name: &str) -> String {
        format!("systemctl stop {name}")
    }

    fn start_command(&self, name: &str) -> String {
        format!("systemctl start {name}")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scriptable controller used across the crate's tests.
    #[derive(Default)]
    pub(crate) struct MockScm {
        pub running: Mutex<HashMap<String, Tristate>>,
        pub controlled: Mutex<Vec<(String, ServiceAction)>>,
    }

    impl MockScm {
        pub fn with_running(states: &[(&str, Tristate)]) -> Self {
            let scm = MockScm::default();
            {
                let mut running = scm.running.lock().unwrap();
                for (name, state) in states {
                    running.insert((*name).into(), *state);
                }
            }
            scm
        }

        pub fn starts_issued(&self) -> Vec<String> {
            self.controlled
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, action)| *action == ServiceAction::Start)
                .map(|(name, _)| name.clone())
                .collect()
        }
    }

    impl ServiceControl for MockScm {
        fn install(&self, _uninstall: bool) -> Result<(), HostError> {
            Ok(())
        }

        fn is_installed(&self) -> Tristate {
            Tristate::No
        }

        fn is_running(&self, name: &str) -> Tristate {
            self.running
                .lock()
                .unwrap()
                .get(name)
                .copied()
                .unwrap_or(Tristate::Unknown)
        }

        fn control(&self, name: &str, action: ServiceAction) -> Result<(), HostError> {
            self.controlled
                .lock()
                .unwrap()
                .push((name.to_string(), action));
            Ok(())
        }

        fn stop_command(&self, name: &str) -> String {
            format!("echo stop {name}")
        }

        fn start_command(&self, name: &str) -> String {
            format!("echo start {name}")
        }
    }

    #[test]
    fn tristate_and_action_render_lowercase() {
        assert_eq!(Tristate::Yes.to_string(), "yes");
        assert_eq!(Tristate::Unknown.to_string(), "unknown");
        assert_eq!(ServiceAction::Start.to_string(), "start");
        assert_eq!(ServiceAction::Stop.to_string(), "stop");
    }

    #[test]
    fn unit_file_names_the_service_entry_point() {
        let settings = Settings::default();
        let control = SystemdControl::new(&settings);
        let unit = control.unit_file();
        assert!(unit.contains("[Service]"));
        assert!(unit.contains(" service\n"));
        assert!(unit.contains("WantedBy=multi-user.target"));
    }

    #[test]
    fn restart_commands_target_the_named_service() {
        let settings = Settings::default();
        let control = SystemdControl::new(&settings);
        assert_eq!(control.stop_command("acme"), "systemctl stop acme");
        assert_eq!(control.start_command("acme"), "systemctl start acme");
    }
}

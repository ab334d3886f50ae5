//! Restart orchestrator.
//!
//! A tripped process threshold cannot be repaired in place, so the host
//! restarts itself through the service controller: it materializes a
//! stop/wait/start script, drains the workers within a bounded window,
//! then launches the script as a detached child that survives this
//! process. The controller's stop request then lands as a normal shutdown.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::error::HostError;
use crate::pool::WorkerPool;
use crate::scm::ServiceControl;

/// Upper bound on waiting for workers to exit before the script takes over.
const DRAIN_ROUNDS: u32 = 10;

/// Orchestrates a full process restart. Always attempts to launch the
/// script, even when the drain times out; remaining workers are cancelled
/// by the `stop_work` that the controller's stop request triggers.
pub fn trigger(pool: &WorkerPool, settings: &Settings, scm: &dyn ServiceControl, reason: &str) {
    warn!("AM: process restart triggered: {reason}");

    let script = match write_script(settings, scm) {
        Ok(path) => Some(path),
        Err(err) => {
            error!("AM: {err}");
            None
        }
    };

    pool.set_shutting_down();
    drain(pool);

    if let Some(path) = script {
        match launch_detached(&path) {
            Ok(()) => info!("AM: restart script launched"),
            Err(err) => error!("AM: failed to launch restart script: {err}"),
        }
    }
}

/// Materializes the stop/wait/start script, preferring the temp dir and
/// falling back to the working directory.
pub fn write_script(settings: &Settings, scm: &dyn ServiceControl) -> Result<PathBuf, HostError> {
    let contents = format!(
        "#!/bin/sh\n{}\nsleep 5\n{}\n",
        scm.stop_command(&settings.service_name),
        scm.start_command(&settings.service_name),
    );
    let file_name = format!("restart.{}.sh", settings.service_name);

    let temp_path = std::env::temp_dir().join(&file_name);
    match write_executable(&temp_path, &contents) {
        Ok(()) => {
            info!("AM: restart script written to {:?}", temp_path);
            return Ok(temp_path);
        }
        Err(err) => {
            warn!("AM: temp dir not writable ({err}), falling back to working directory");
        }
    }

    let fallback = std::env::current_dir()
        .map_err(HostError::ScriptWrite)?
        .join(&file_name);
    write_executable(&fallback, &contents).map_err(HostError::ScriptWrite)?;
    info!("AM: restart script written to {:?}", fallback);
    Ok(fallback)
}

fn write_executable(path: &Path, contents: &str) -> io::Result<()> {
    std::fs::write(path, contents)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

fn drain(pool: &WorkerPool) {
    for round in 0..DRAIN_ROUNDS {
        if !pool.any_worker_alive() {
            debug!("AM: all workers drained after {round}s");
            return;
        }
        thread::sleep(Duration::from_secs(1));
    }
    warn!("AM: drain window elapsed with workers still running");
}

/// Launches the script in its own session with no inherited stdio, so it
/// outlives this process and the controller's stop of it.
fn launch_detached(script: &Path) -> io::Result<()> {
    let mut command = Command::new("sh");
    command
        .arg(script)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    unsafe {
        command.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }
    // Not reaped: this process is about to be stopped by the script.
    command.spawn().map(|_child| ())
}

//! Interactive operator console.
//!
//! A line-oriented menu that drives the same operations the manager and
//! the CLI do: status, install/uninstall, start/stop through the
//! controller, single-step execution, a foreground debug loop, and the
//! watchdog pass. Operators can register additional entries under unused
//! keys.

use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use tracing::warn;

use crate::config::Settings;
use crate::pool::{Work, WorkerPool};
use crate::scm::{ServiceAction, ServiceControl, Tristate};
use crate::status;
use crate::watchdog;

type MenuAction = Box<dyn Fn()>;

/// Menu-driven operator front end.
pub struct Console {
    settings: Arc<Settings>,
    scm: Arc<dyn ServiceControl>,
    pool: Arc<WorkerPool>,
    custom: BTreeMap<char, (String, MenuAction)>,
}

const BUILTIN_KEYS: &[char] = &['0', '1', '2', '3', '4', '5', '7'];

impl Console {
    pub fn new(settings: Arc<Settings>, scm: Arc<dyn ServiceControl>, work: Arc<dyn Work>) -> Self {
        let pool = WorkerPool::new(work, Arc::clone(&settings));
        Self {
            settings,
            scm,
            pool,
            custom: BTreeMap::new(),
        }
    }

    /// Registers an extra menu entry. Built-in keys cannot be overridden.
    pub fn register(&mut self, key: char, label: impl Into<String>, action: MenuAction) {
        if BUILTIN_KEYS.contains(&key) {
            warn!("console: key '{key}' is reserved, entry ignored");
            return;
        }
        self.custom.insert(key, (label.into(), action));
    }

    /// Runs the menu until the operator exits.
    pub fn run(&self) -> io::Result<()> {
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();

        loop {
            self.print_menu()?;
            let Some(line) = lines.next() else {
                return Ok(());
            };
            let line = line?;
            let Some(key) = line.trim().chars().next() else {
                continue;
            };

            match key {
                '0' => return Ok(()),
                '1' => self.show_status(),
                '2' => self.toggle_install(),
                '3' => self.toggle_service(),
                '4' => self.single_step(&mut lines)?,
                '5' => self.loop_debug(&mut lines)?,
                '7' => self.watchdog_pass(),
                other => match self.custom.get(&other) {
                    Some((_, action)) => action(),
                    None => println!("Unknown option '{other}'"),
                },
            }
        }
    }

    fn print_menu(&self) -> io::Result<()> {
        println!();
        println!("  1  show status");
        println!("  2  install / uninstall service");
        println!("  3  start / stop service");
        println!("  4  run work once (single step)");
        println!("  5  run worker loop until key pressed");
        println!("  7  watchdog check");
        for (key, (label, _)) in &self.custom {
            println!("  {key}  {label}");
        }
        println!("  0  exit");
        print!("> ");
        io::stdout().flush()
    }

    fn show_status(&self) {
        let report = status::collect(&self.settings, self.scm.as_ref(), Some(&self.pool));
        println!("{}", status::render(&report));
    }

    fn toggle_install(&self) {
        let result = match self.scm.is_installed() {
            Tristate::Yes => {
                println!("Uninstalling '{}'...", self.settings.service_name);
                self.scm.install(true)
            }
            Tristate::No => {
                println!("Installing '{}'...", self.settings.service_name);
                self.scm.install(false)
            }
            Tristate::Unknown => {
                println!("Install state unknown; not acting on it.");
                return;
            }
        };
        if let Err(err) = result {
            println!("Failed: {err}");
        }
    }

    fn toggle_service(&self) {
        let name = &self.settings.service_name;
        let action = match self.scm.is_running(name) {
            Tristate::Yes => ServiceAction::Stop,
            Tristate::No => ServiceAction::Start,
            Tristate::Unknown => {
                println!("Run state unknown; not acting on it.");
                return;
            }
        };
        println!("Requesting {action} of '{name}'...");
        if let Err(err) = self.scm.control(name, action) {
            println!("Failed: {err}");
        }
    }

    fn single_step(&self, lines: &mut impl Iterator<Item = io::Result<String>>) -> io::Result<()> {
        print!("Worker index (Enter for all): ");
        io::stdout().flush()?;
        let choice = match lines.next() {
            Some(line) => line?,
            None => return Ok(()),
        };

        let indexes: Vec<usize> = match choice.trim().parse::<usize>() {
            Ok(index) => vec![index],
            Err(_) => (0..self.settings.thread_count).collect(),
        };

        for index in indexes {
            if !self.settings.worker_enabled(index) {
                println!("{}: disabled", self.settings.worker_name(index));
                continue;
            }
            match self.pool.run_once(index) {
                Ok(rerun) => println!(
                    "{}: work returned (rerun={rerun})",
                    self.settings.worker_name(index)
                ),
                Err(err) => println!("{err}"),
            }
        }
        Ok(())
    }

    fn loop_debug(&self, lines: &mut impl Iterator<Item = io::Result<String>>) -> io::Result<()> {
        println!("Starting worker pool; press Enter to stop.");
        self.pool.start_work(Arc::clone(&self.scm));
        let _ = lines.next();
        self.pool.stop_work();
        println!("Worker pool stopped.");
        Ok(())
    }

    fn watchdog_pass(&self) {
        let peers = watchdog::parse_peers(&self.settings.watch_dog);
        if peers.is_empty() {
            println!("No watchdog peers configured.");
            return;
        }
        let started = watchdog::check(self.scm.as_ref(), &peers);
        println!("Watchdog pass complete: {started} start request(s) issued.");
    }
}

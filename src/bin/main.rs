use std::error::Error;
use std::io::BufRead;
use std::sync::{Arc, mpsc};

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use stationd::{
    cli::{Cli, Commands, parse_args},
    config::{Settings, load_settings},
    console::Console,
    pool::{Work, WorkerPool},
    scm::{ServiceAction, ServiceControl, SystemdControl},
};

/// Built-in work function: a heartbeat that applications replace with
/// their own [`Work`] implementation when embedding the host library.
struct HeartbeatWork;

impl Work for HeartbeatWork {
    fn work(&self, index: usize) -> bool {
        debug!("A{index}: heartbeat");
        false
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    let settings = Arc::new(load_settings(&args.config)?);
    let scm: Arc<dyn ServiceControl> = Arc::new(SystemdControl::new(&settings));
    let work: Arc<dyn Work> = Arc::new(HeartbeatWork);

    match args.command {
        Some(Commands::Service) => run_service(settings, scm, work)?,
        Some(Commands::Install) => scm.install(false)?,
        Some(Commands::Uninstall) => scm.install(true)?,
        Some(Commands::Start) => scm.control(&settings.service_name, ServiceAction::Start)?,
        Some(Commands::Stop) => scm.control(&settings.service_name, ServiceAction::Stop)?,
        Some(Commands::Run) => run_foreground(settings, scm, work)?,
        Some(Commands::Step) => step_all(&settings, work),
        None => Console::new(settings, scm, work).run()?,
    }

    Ok(())
}

/// Headless mode under the service controller: run the pool until the
/// controller's stop request arrives as a termination signal.
fn run_service(
    settings: Arc<Settings>,
    scm: Arc<dyn ServiceControl>,
    work: Arc<dyn Work>,
) -> Result<(), Box<dyn Error>> {
    let pool = WorkerPool::new(work, Arc::clone(&settings));

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    pool.start_work(scm);
    info!("{}: service running", settings.service_name);
    let _ = rx.recv();
    info!("{}: stop signal received", settings.service_name);
    pool.stop_work();
    Ok(())
}

/// Foreground debug mode: run the pool until a key is pressed.
fn run_foreground(
    settings: Arc<Settings>,
    scm: Arc<dyn ServiceControl>,
    work: Arc<dyn Work>,
) -> Result<(), Box<dyn Error>> {
    let pool = WorkerPool::new(work, Arc::clone(&settings));
    pool.start_work(scm);
    println!("Worker pool running; press Enter to stop.");

    let stdin = std::io::stdin();
    let mut line = String::new();
    let _ = stdin.lock().read_line(&mut line);

    pool.stop_work();
    Ok(())
}

/// Runs every enabled worker's work function exactly once.
fn step_all(settings: &Arc<Settings>, work: Arc<dyn Work>) {
    let pool = WorkerPool::new(work, Arc::clone(settings));
    for index in 0..settings.thread_count {
        let name = settings.worker_name(index);
        if !settings.worker_enabled(index) {
            println!("{name}: disabled, skipped");
            continue;
        }
        match pool.run_once(index) {
            Ok(rerun) => println!("{name}: step complete (rerun={rerun})"),
            Err(err) => error!("{name}: step failed: {err}"),
        }
    }
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

//! Command-line interface for stationd.
use clap::{Parser, Subcommand};
use std::str::FromStr;
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for stationd.
#[derive(Parser)]
#[command(name = "stationd", version, author)]
#[command(about = "A supervised multi-worker service host", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Path to the settings file.
    #[arg(short, long, default_value = "stationd.yaml", global = true)]
    pub config: String,

    /// The command to execute. Without one, the interactive console starts.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands for stationd.
#[derive(Subcommand)]
pub enum Commands {
    /// Run under the service controller (headless; no console I/O).
    Service,

    /// Register the host with the service controller.
    Install,

    /// Remove the host from the service controller.
    Uninstall,

    /// Start the already-installed service.
    Start,

    /// Stop the already-installed service.
    Stop,

    /// Start the worker pool in the foreground, wait for a key, exit.
    Run,

    /// Run every worker's work function exactly once, then exit.
    Step,
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_parses_names_and_numbers() {
        assert_eq!("debug".parse::<LogLevelArg>().unwrap().as_str(), "debug");
        assert_eq!("WARN".parse::<LogLevelArg>().unwrap().as_str(), "warn");
        assert_eq!("3".parse::<LogLevelArg>().unwrap().as_str(), "info");
        assert_eq!("0".parse::<LogLevelArg>().unwrap().as_str(), "off");
    }

    #[test]
    fn log_level_rejects_garbage() {
        assert!("verbose".parse::<LogLevelArg>().is_err());
        assert!("7".parse::<LogLevelArg>().is_err());
        assert!("".parse::<LogLevelArg>().is_err());
    }
}

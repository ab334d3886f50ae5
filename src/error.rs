use thiserror::Error;

/// Defines all possible errors that can occur in the service host.
#[derive(Debug, Error)]
pub enum HostError {
    /// Error reading or accessing the settings file.
    #[error("Failed to read settings file: {0}")]
    ConfigRead(#[source] std::io::Error),

    /// Error parsing the YAML settings file.
    #[error("Invalid settings format: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// A worker index outside the pool bounds was requested.
    #[error("Worker index {index} out of range (pool has {count} workers)")]
    InvalidWorkerIndex {
        /// The requested index.
        index: usize,
        /// The number of workers in the pool.
        count: usize,
    },

    /// The service controller rejected or failed a request.
    #[error("Service control failed for '{service}': {reason}")]
    Scm {
        /// The service the request targeted.
        service: String,
        /// What went wrong.
        reason: String,
    },

    /// Error materializing the restart script.
    #[error("Failed to write restart script: {0}")]
    ScriptWrite(#[source] std::io::Error),

    /// Any other I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

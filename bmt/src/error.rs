use thiserror::Error;

/// Errors that can occur while ramping up or running workers.
#[derive(Debug, Error)]
pub enum Error {
    /// The controller was configured with values it cannot work with.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// A worker could not open its connection to the collector.
    #[error("failed to connect to collector at {addr}")]
    Connect {
        addr: String,
        #[source]
        cause: bmt_scribe::Error,
    },

    /// A worker gave up waiting for its connection to be established.
    #[error("timed out connecting to collector at {addr}")]
    ConnectTimeout { addr: String },

    /// A batch could not be delivered, which ends the worker.
    #[error("worker {worker} failed to send a batch after {written} records")]
    Send {
        worker: usize,
        written: u64,
        #[source]
        cause: bmt_scribe::Error,
    },
}

/// Result type for load generator operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

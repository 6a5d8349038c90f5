use std::{fmt, io};

use ml_core::MlErr;

/// The orchestrator's result type.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// All errors that can occur in the orchestrator.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Invalid configuration, caught before any worker is spawned.
    InvalidConfig(String),
    /// Parallel training was requested without a worker pool.
    NoWorkerPool,
    /// The pool has fewer workers than sampled deltas.
    PoolTooSmall { workers: usize, num_deltas: usize },
    /// The worker's channel closed before it replied.
    WorkerLost { worker_id: usize },
    /// The worker replied with an unexpected message kind.
    Protocol {
        worker_id: usize,
        expected: &'static str,
        got: &'static str,
    },
    /// The worker didn't reply within the configured timeout.
    ReplyTimeout { worker_id: usize },
    /// A worker task finished with an error.
    WorkerError { worker_id: usize, msg: String },
    /// A loaded policy doesn't fit the environment or the action space.
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    /// A previous parallel iteration failed, the pool can't be trusted anymore.
    SessionFailed,
    Ml(MlErr),
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::NoWorkerPool => write!(f, "parallel training requires a worker pool"),
            Self::PoolTooSmall {
                workers,
                num_deltas,
            } => write!(
                f,
                "the pool has {workers} worker(s) but {num_deltas} deltas are sampled"
            ),
            Self::WorkerLost { worker_id } => write!(f, "worker {worker_id} is gone"),
            Self::Protocol {
                worker_id,
                expected,
                got,
            } => write!(f, "worker {worker_id} replied {got}, expected {expected}"),
            Self::ReplyTimeout { worker_id } => {
                write!(f, "worker {worker_id} didn't reply in time")
            }
            Self::WorkerError { worker_id, msg } => {
                write!(f, "worker {worker_id} error: {msg}")
            }
            Self::DimensionMismatch {
                what,
                expected,
                got,
            } => write!(
                f,
                "policy {what} dimension mismatch: got {got}, expected {expected}"
            ),
            Self::SessionFailed => {
                write!(f, "a previous iteration failed, the worker pool must be closed")
            }
            Self::Ml(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Ml(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for OrchestratorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<MlErr> for OrchestratorError {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidConfig(e.to_string())
    }
}

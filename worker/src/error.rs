use std::{error::Error, fmt};

use ml_core::MlErr;
use tokio::task::JoinError;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Ml(MlErr),
    /// The blocking episode task panicked or was aborted.
    Join(JoinError),
    /// The evaluator was lost by a previous failed episode.
    Poisoned { worker_id: usize },
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Ml(e) => write!(f, "episode failed: {e}"),
            WorkerErr::Join(e) => write!(f, "episode task failed: {e}"),
            WorkerErr::Poisoned { worker_id } => {
                write!(f, "worker {worker_id} lost its environment")
            }
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Ml(e) => Some(e),
            WorkerErr::Join(e) => Some(e),
            WorkerErr::Poisoned { .. } => None,
        }
    }
}

impl From<MlErr> for WorkerErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<JoinError> for WorkerErr {
    fn from(value: JoinError) -> Self {
        Self::Join(value)
    }
}

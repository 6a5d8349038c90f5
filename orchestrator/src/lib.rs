//! The coordinator side of augmented random search: the agent, the worker
//! pool it explores with and the training session that ties them together.

pub mod agent;
pub mod configs;
pub mod error;
pub mod pool;
mod session;

pub use agent::{Agent, IterationReport, UpdateOutcome};
pub use configs::{CheckpointConfig, ModeConfig, TrainingConfig};
pub use error::{OrchestratorError, Result};
pub use pool::{PoolConfig, WorkerHandle, WorkerPool};
pub use session::Session;

use std::{fmt, sync::Arc};

use ml_core::{Direction, Perturbation, PolicySnapshot};
use ndarray::Array2;

/// An exploration request: roll out one episode with a perturbed snapshot.
///
/// The coordinator's normalizer is not part of the request, every worker
/// normalizes states with its own independent statistics.
#[derive(Debug, Clone)]
pub struct ExploreJob {
    pub policy: Arc<PolicySnapshot>,
    pub direction: Direction,
    pub delta: Arc<Array2<f32>>,
}

impl ExploreJob {
    pub fn perturbation(&self) -> Perturbation<'_> {
        Perturbation::new(&self.delta, self.direction)
    }
}

/// The messages the coordinator sends to a worker.
#[derive(Debug, Clone)]
pub enum Command {
    /// Re-initialize the worker's environment.
    Reset,
    /// Run one episode and report its cumulative reward.
    Explore(ExploreJob),
    /// Acknowledge and shut down.
    Close,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Reset => "reset",
            Command::Explore(_) => "explore",
            Command::Close => "close",
        }
    }
}

/// The messages a worker sends back to the coordinator, one per command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reply {
    ResetOk,
    Reward(f32),
    CloseOk,
}

impl Reply {
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::ResetOk => "reset ok",
            Reply::Reward(_) => "reward",
            Reply::CloseOk => "close ok",
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Reward(reward) => write!(f, "{reward}"),
            other => write!(f, "{}", other.kind()),
        }
    }
}

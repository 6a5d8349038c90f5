//! Augmented random search building blocks: the linear policy, the state
//! normalizer, the episode evaluator and the rollout ranking.

pub mod env;
mod error;
pub mod normalizer;
mod persist;
pub mod policy;
pub mod ranking;
pub mod rollout;

pub use env::{Environment, PointMass, Transition};
pub use error::{MlErr, Result};
pub use normalizer::{NormalizationMode, Normalizer};
pub use persist::{POLICY_SUFFIX, policy_path};
pub use policy::{Direction, Evaluate, Hyperparams, Perturbation, Policy, PolicySnapshot};
pub use ranking::{RolloutResult, rank, reward_std, select_best};
pub use rollout::{Episode, Evaluator};

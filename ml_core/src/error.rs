use std::{fmt, io};

use ndarray::ShapeError;
use safetensors::SafeTensorError;

/// The result type used in the entire ml core crate.
pub type Result<T> = std::result::Result<T, MlErr>;

/// Errors produced by the policy, the normalizer and the episode evaluator.
#[derive(Debug)]
pub enum MlErr {
    /// A shape invariant was violated (e.g. a state of the wrong length).
    SizeMismatch {
        /// Human-readable context for the mismatch (e.g. "state", "delta").
        what: &'static str,
        got: usize,
        expected: usize,
    },
    /// The hyperparameters can't describe a valid policy.
    InvalidHyperparams(String),
    /// The reward standard deviation can't scale an update (zero or not finite).
    DegenerateRewards { std_dev: f32 },
    /// More rollouts were handed to an update than the policy keeps.
    TooManyRollouts { got: usize, max: usize },
    /// The episode was abandoned before it finished.
    Interrupted,
    /// A persisted policy is malformed.
    Format(String),
    Io(io::Error),
}

impl fmt::Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(f, "size mismatch for {what}: got {got}, expected {expected}"),
            MlErr::InvalidHyperparams(msg) => write!(f, "invalid hyperparameters: {msg}"),
            MlErr::DegenerateRewards { std_dev } => write!(
                f,
                "can't scale the update step, rewards standard deviation is {std_dev}"
            ),
            MlErr::TooManyRollouts { got, max } => {
                write!(f, "got {got} rollouts for an update that keeps at most {max}")
            }
            MlErr::Interrupted => write!(f, "episode interrupted"),
            MlErr::Format(msg) => write!(f, "malformed policy file: {msg}"),
            MlErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for MlErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MlErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SafeTensorError> for MlErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Format(value.to_string())
    }
}

impl From<serde_json::Error> for MlErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Format(value.to_string())
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Format(value.to_string())
    }
}

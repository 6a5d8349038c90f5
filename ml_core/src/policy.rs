use std::fmt;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_rand::{RandomExt, rand_distr::StandardNormal};
use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::{MlErr, Result, ranking::RolloutResult};

/// Tunable parameters of the random search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparams {
    /// How much the weights move on each update.
    pub learning_rate: f32,
    /// Number of perturbations sampled per iteration, each one is rolled out twice.
    pub num_deltas: usize,
    /// Number of top ranked perturbations used to update the weights.
    pub num_best_deltas: usize,
    /// Maximum amount of environment steps per episode.
    pub episode_steps: usize,
    /// Scale applied to the perturbations when exploring.
    pub noise_scale: f32,
    pub seed: u64,
}

impl Default for Hyperparams {
    fn default() -> Self {
        Self {
            learning_rate: 0.02,
            num_deltas: 16,
            num_best_deltas: 16,
            episode_steps: 500,
            noise_scale: 0.01,
            seed: 1,
        }
    }
}

impl Hyperparams {
    /// Checks the hyperparameters describe a usable policy.
    ///
    /// # Returns
    /// An error if there are more best deltas than deltas or any count is zero.
    pub fn validate(&self) -> Result<()> {
        if self.num_deltas == 0 {
            return Err(MlErr::InvalidHyperparams("num_deltas must be non zero".into()));
        }

        if self.num_best_deltas == 0 || self.num_best_deltas > self.num_deltas {
            return Err(MlErr::InvalidHyperparams(format!(
                "num_best_deltas must be in 1..={}, got {}",
                self.num_deltas, self.num_best_deltas
            )));
        }

        if self.episode_steps == 0 {
            return Err(MlErr::InvalidHyperparams(
                "episode_steps must be non zero".into(),
            ));
        }

        Ok(())
    }
}

/// The side of a perturbation being explored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Positive,
    Negative,
}

impl Direction {
    pub fn sign(self) -> f32 {
        match self {
            Direction::Positive => 1.0,
            Direction::Negative => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Positive => write!(f, "+"),
            Direction::Negative => write!(f, "-"),
        }
    }
}

/// A directed perturbation of the policy weights.
#[derive(Debug, Clone, Copy)]
pub struct Perturbation<'a> {
    pub delta: ArrayView2<'a, f32>,
    pub direction: Direction,
}

impl<'a> Perturbation<'a> {
    pub fn new(delta: &'a Array2<f32>, direction: Direction) -> Self {
        Self {
            delta: delta.view(),
            direction,
        }
    }

    pub fn positive(delta: &'a Array2<f32>) -> Self {
        Self::new(delta, Direction::Positive)
    }

    pub fn negative(delta: &'a Array2<f32>) -> Self {
        Self::new(delta, Direction::Negative)
    }
}

/// Maps states into actions through a linear map, optionally perturbed.
///
/// Implemented by the trainable [`Policy`] and by the immutable
/// [`PolicySnapshot`] handed out to workers.
pub trait Evaluate {
    fn weights(&self) -> ArrayView2<'_, f32>;

    fn noise_scale(&self) -> f32;

    fn episode_steps(&self) -> usize;

    /// Returns the weights actually used when exploring with `perturbation`.
    ///
    /// # Arguments
    /// * `perturbation` - The delta and the direction to move the weights towards.
    ///
    /// # Returns
    /// `W + noise * delta` or `W - noise * delta`.
    fn perturbed_weights(&self, perturbation: Perturbation<'_>) -> Array2<f32> {
        let mut weights = self.weights().to_owned();
        let alpha = perturbation.direction.sign() * self.noise_scale();
        weights.scaled_add(alpha, &perturbation.delta);
        weights
    }

    /// Computes the action for `state`.
    ///
    /// Without a perturbation the plain weights are used, that's the deployment mode.
    ///
    /// # Arguments
    /// * `state` - An (usually normalized) state.
    /// * `perturbation` - An optional exploration perturbation.
    ///
    /// # Returns
    /// The action vector.
    fn evaluate(
        &self,
        state: ArrayView1<f32>,
        perturbation: Option<Perturbation<'_>>,
    ) -> Array1<f32> {
        match perturbation {
            None => self.weights().dot(&state),
            Some(perturbation) => self.perturbed_weights(perturbation).dot(&state),
        }
    }
}

/// Immutable copy of the policy weights shipped with every exploration request.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySnapshot {
    weights: Array2<f32>,
    noise_scale: f32,
    episode_steps: usize,
}

impl Evaluate for PolicySnapshot {
    fn weights(&self) -> ArrayView2<'_, f32> {
        self.weights.view()
    }

    fn noise_scale(&self) -> f32 {
        self.noise_scale
    }

    fn episode_steps(&self) -> usize {
        self.episode_steps
    }
}

/// Linear state to action policy, the weight matrix is `[action_dim x state_dim]`.
#[derive(Debug, Clone)]
pub struct Policy {
    pub(crate) weights: Array2<f32>,
    pub(crate) hyperparams: Hyperparams,
    pub(crate) rng: StdRng,
}

impl Policy {
    /// Creates a new `Policy` with all of its weights set to zero.
    ///
    /// # Arguments
    /// * `state_dim` - The dimensionality of the states.
    /// * `action_dim` - The dimensionality of the actions.
    /// * `hyperparams` - The search hyperparameters.
    ///
    /// # Returns
    /// A new `Policy` or an error if the hyperparameters are invalid.
    pub fn new(state_dim: usize, action_dim: usize, hyperparams: Hyperparams) -> Result<Self> {
        hyperparams.validate()?;

        Ok(Self {
            weights: Array2::zeros((action_dim, state_dim)),
            rng: StdRng::seed_from_u64(hyperparams.seed),
            hyperparams,
        })
    }

    pub fn hyperparams(&self) -> &Hyperparams {
        &self.hyperparams
    }

    pub fn state_dim(&self) -> usize {
        self.weights.ncols()
    }

    pub fn action_dim(&self) -> usize {
        self.weights.nrows()
    }

    /// Samples a fresh set of `num_deltas` perturbations from a standard normal.
    ///
    /// # Returns
    /// A vec of matrices shaped like the weights.
    pub fn sample_deltas(&mut self) -> Vec<Array2<f32>> {
        let shape = self.weights.raw_dim();

        (0..self.hyperparams.num_deltas)
            .map(|_| Array2::random_using(shape, StandardNormal, &mut self.rng))
            .collect()
    }

    /// Moves the weights along the reward weighted perturbations.
    ///
    /// `W += lr / (num_best_deltas * std_dev_rewards) * sum((r_pos - r_neg) * delta)`
    ///
    /// # Arguments
    /// * `rollouts` - The selected rollouts, at most `num_best_deltas` of them.
    /// * `std_dev_rewards` - The standard deviation of every sampled reward of the iteration.
    ///
    /// # Returns
    /// An error if the standard deviation is zero or not finite, in which case
    /// the weights are left untouched, or if the rollouts are malformed.
    pub fn update(&mut self, rollouts: &[RolloutResult], std_dev_rewards: f32) -> Result<()> {
        let Hyperparams {
            learning_rate,
            num_best_deltas,
            ..
        } = self.hyperparams;

        if rollouts.len() > num_best_deltas {
            return Err(MlErr::TooManyRollouts {
                got: rollouts.len(),
                max: num_best_deltas,
            });
        }

        if !std_dev_rewards.is_finite() || std_dev_rewards <= 0.0 {
            return Err(MlErr::DegenerateRewards {
                std_dev: std_dev_rewards,
            });
        }

        let mut step = Array2::zeros(self.weights.raw_dim());
        for rollout in rollouts {
            if rollout.delta.dim() != step.dim() {
                return Err(MlErr::SizeMismatch {
                    what: "delta",
                    got: rollout.delta.len(),
                    expected: step.len(),
                });
            }

            step.scaled_add(rollout.positive - rollout.negative, &*rollout.delta);
        }

        let alpha = learning_rate / (num_best_deltas as f32 * std_dev_rewards);
        self.weights.scaled_add(alpha, &step);
        Ok(())
    }

    /// Takes an immutable copy of the weights for remote evaluation.
    pub fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            weights: self.weights.clone(),
            noise_scale: self.hyperparams.noise_scale,
            episode_steps: self.hyperparams.episode_steps,
        }
    }
}

impl Evaluate for Policy {
    fn weights(&self) -> ArrayView2<'_, f32> {
        self.weights.view()
    }

    fn noise_scale(&self) -> f32 {
        self.hyperparams.noise_scale
    }

    fn episode_steps(&self) -> usize {
        self.hyperparams.episode_steps
    }
}

use ndarray::{Array1, ArrayView1};

use crate::{
    Environment, MlErr, Result,
    normalizer::{NormalizationMode, Normalizer},
    policy::{Evaluate, Perturbation},
};

/// Bound applied to every reward before it's accumulated.
pub const REWARD_BOUND: f32 = 1.0;

/// Summary of a finished episode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Episode {
    /// The cumulative clipped reward.
    pub reward: f32,
    pub steps: usize,
    /// Whether the environment ended the episode before the step budget.
    pub done: bool,
}

/// Clips every action component to `[-max_action, max_action]`.
pub fn clip_action(action: &mut Array1<f32>, max_action: f32) {
    action.mapv_inplace(|a| a.max(-max_action).min(max_action));
}

/// Clips a reward to `[-1, 1]`.
pub fn clip_reward(reward: f32) -> f32 {
    reward.max(-REWARD_BOUND).min(REWARD_BOUND)
}

/// Runs full episodes on an exclusively owned environment.
///
/// Pairs the environment with the normalizer that watches its states, the
/// coordinator owns the canonical one and every worker owns its own.
#[derive(Debug)]
pub struct Evaluator<E> {
    env: E,
    normalizer: Normalizer,
    mode: NormalizationMode,
    max_action: f32,
}

impl<E: Environment> Evaluator<E> {
    /// Creates a new `Evaluator` with a fresh normalizer.
    ///
    /// # Arguments
    /// * `env` - The environment to roll out on.
    /// * `mode` - Whether states are normalized before reaching the policy.
    pub fn new(env: E, mode: NormalizationMode) -> Self {
        Self {
            normalizer: Normalizer::new(env.observation_dim()),
            max_action: env.action_bound(),
            env,
            mode,
        }
    }

    /// Runs one episode of at most `policy.episode_steps()` steps.
    ///
    /// Every state is observed and then normalized (when enabled) before the
    /// policy acts on it, actions and rewards are clipped.
    ///
    /// # Arguments
    /// * `policy` - The policy or snapshot to act with.
    /// * `perturbation` - The exploration perturbation, `None` to deploy the plain weights.
    ///
    /// # Returns
    /// The episode summary or an error if the environment's states or the
    /// delta don't fit the policy.
    pub fn run<P>(&mut self, policy: &P, perturbation: Option<Perturbation<'_>>) -> Result<Episode>
    where
        P: Evaluate + ?Sized,
    {
        self.run_until(policy, perturbation, || false)
    }

    /// Same as [`Evaluator::run`] but `stop` is checked before every step.
    ///
    /// # Returns
    /// `MlErr::Interrupted` as soon as `stop` returns true.
    pub fn run_until<P, S>(
        &mut self,
        policy: &P,
        perturbation: Option<Perturbation<'_>>,
        stop: S,
    ) -> Result<Episode>
    where
        P: Evaluate + ?Sized,
        S: Fn() -> bool,
    {
        let (rows, cols) = policy.weights().dim();
        if let Some(perturbation) = perturbation
            && perturbation.delta.dim() != (rows, cols)
        {
            return Err(MlErr::SizeMismatch {
                what: "delta",
                got: perturbation.delta.len(),
                expected: rows * cols,
            });
        }

        // The perturbed weights stay the same for the whole episode.
        let perturbed = perturbation.map(|p| policy.perturbed_weights(p));
        let weights = match &perturbed {
            Some(weights) => weights.view(),
            None => policy.weights(),
        };

        let mut state = Array1::from(self.env.reset());
        let mut episode = Episode {
            reward: 0.0,
            steps: 0,
            done: false,
        };

        while !episode.done && episode.steps < policy.episode_steps() {
            if stop() {
                return Err(MlErr::Interrupted);
            }

            if state.len() != cols {
                return Err(MlErr::SizeMismatch {
                    what: "state",
                    got: state.len(),
                    expected: cols,
                });
            }

            let input = self.prepare(state.view())?;
            let mut action = weights.dot(&input);
            clip_action(&mut action, self.max_action);

            let transition = match action.as_slice() {
                Some(action) => self.env.step(action),
                None => self.env.step(&action.to_vec()),
            };

            episode.reward += clip_reward(transition.reward);
            episode.steps += 1;
            episode.done = transition.done;
            state = Array1::from(transition.state);
        }

        Ok(episode)
    }

    /// Resets the environment outside of an episode.
    pub fn reset_env(&mut self) -> Vec<f32> {
        self.env.reset()
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    fn prepare(&mut self, state: ArrayView1<f32>) -> Result<Array1<f32>> {
        match self.mode {
            NormalizationMode::Enabled => {
                self.normalizer.observe(state)?;
                self.normalizer.normalize(state)
            }
            NormalizationMode::Disabled => Ok(state.to_owned()),
        }
    }
}

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use comms::{Command, ExploreJob};
use log::{debug, info, warn};
use ml_core::{
    Direction, Environment, Evaluator, Hyperparams, MlErr, NormalizationMode, Normalizer,
    Perturbation, Policy, PolicySnapshot, RolloutResult, reward_std, select_best,
};
use ndarray::Array2;

use crate::{OrchestratorError, Result, pool::WorkerHandle};

/// Whether an iteration moved the weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// Every sampled reward was the same, the weights were left untouched.
    Skipped,
}

/// Summary of a single training iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationReport {
    /// The reward of the updated policy without any perturbation.
    pub deployment_reward: f32,
    pub update: UpdateOutcome,
    /// `max(r_pos, r_neg)` of the best ranked delta.
    pub best_score: f32,
    pub reward_std: f32,
}

/// The coordinator: owns the canonical policy, normalizer and environment.
///
/// It's the only one mutating the policy, and only between rollout batches.
pub struct Agent<E> {
    policy: Policy,
    evaluator: Evaluator<E>,
}

impl<E: Environment> Agent<E> {
    /// Creates a new `Agent` with a zeroed policy.
    ///
    /// # Arguments
    /// * `env` - The coordinator's own environment, it sets the state dimension.
    /// * `hyperparams` - The search hyperparameters.
    /// * `action_dim` - The dimensionality of the actions.
    /// * `mode` - Whether states are normalized.
    ///
    /// # Returns
    /// A new `Agent` or an error if the hyperparameters are invalid.
    pub fn new(
        env: E,
        hyperparams: Hyperparams,
        action_dim: usize,
        mode: NormalizationMode,
    ) -> Result<Self> {
        let policy = Policy::new(env.observation_dim(), action_dim, hyperparams)?;

        Ok(Self {
            policy,
            evaluator: Evaluator::new(env, mode),
        })
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn normalizer(&self) -> &Normalizer {
        self.evaluator.normalizer()
    }

    pub fn env(&self) -> &E {
        self.evaluator.env()
    }

    /// Runs one episode on the coordinator's environment.
    ///
    /// # Arguments
    /// * `perturbation` - The exploration perturbation, `None` to measure the current policy.
    ///
    /// # Returns
    /// The cumulative clipped reward.
    pub fn deploy(&mut self, perturbation: Option<Perturbation<'_>>) -> Result<f32> {
        let episode = self.evaluator.run(&self.policy, perturbation)?;
        Ok(episode.reward)
    }

    /// Runs a sequential iteration, see [`Agent::train_iteration`].
    ///
    /// # Returns
    /// The deployment reward after the update.
    pub fn train(&mut self) -> Result<f32> {
        Ok(self.train_iteration()?.deployment_reward)
    }

    /// Explores every sampled delta in-process, one episode after another.
    pub fn train_iteration(&mut self) -> Result<IterationReport> {
        let deltas = self.sample_deltas();
        let mut positive = Vec::with_capacity(deltas.len());
        let mut negative = Vec::with_capacity(deltas.len());

        for delta in &deltas {
            positive.push(self.deploy(Some(Perturbation::positive(delta)))?);
            negative.push(self.deploy(Some(Perturbation::negative(delta)))?);
        }

        self.finish_iteration(&positive, &negative, &deltas)
    }

    /// Runs a parallel iteration, see [`Agent::train_parallel_iteration`].
    ///
    /// # Returns
    /// The deployment reward after the update.
    pub async fn train_parallel(&mut self, workers: &mut [WorkerHandle]) -> Result<f32> {
        Ok(self.train_parallel_iteration(workers).await?.deployment_reward)
    }

    /// Explores every sampled delta on the worker pool, worker `k` explores delta `k`.
    ///
    /// Every `+` request is sent before any `+` reply is awaited, then the
    /// same is done for the `-` direction, so the workers roll out concurrently.
    /// Replies left over by a previously interrupted iteration are discarded
    /// before any delta is sampled.
    ///
    /// # Arguments
    /// * `workers` - The pool handles, at least `num_deltas` of them.
    ///
    /// # Returns
    /// The iteration report, `NoWorkerPool` without handles or `PoolTooSmall`
    /// if there are fewer handles than deltas.
    pub async fn train_parallel_iteration(
        &mut self,
        workers: &mut [WorkerHandle],
    ) -> Result<IterationReport> {
        if workers.is_empty() {
            return Err(OrchestratorError::NoWorkerPool);
        }

        let num_deltas = self.policy.hyperparams().num_deltas;
        if workers.len() < num_deltas {
            return Err(OrchestratorError::PoolTooSmall {
                workers: workers.len(),
                num_deltas,
            });
        }

        let workers = &mut workers[..num_deltas];
        for worker in workers.iter_mut() {
            worker.settle().await?;
        }

        let deltas = self.sample_deltas();
        let snapshot = Arc::new(self.policy.snapshot());

        let positive = explore_all(workers, &snapshot, &deltas, Direction::Positive).await?;
        let negative = explore_all(workers, &snapshot, &deltas, Direction::Negative).await?;

        self.finish_iteration(&positive, &negative, &deltas)
    }

    /// Saves the policy, the normalizer is not persisted.
    ///
    /// # Returns
    /// The path of the written file.
    pub fn save(&self, prefix: impl AsRef<Path>) -> Result<PathBuf> {
        Ok(self.policy.save(prefix)?)
    }

    /// Replaces the policy with a saved one.
    ///
    /// # Returns
    /// `DimensionMismatch` if the saved policy doesn't fit the environment's
    /// states or the agent's actions, the current policy is kept in that case.
    pub fn load(&mut self, prefix: impl AsRef<Path>) -> Result<()> {
        let mut policy = self.policy.clone();
        policy.load(prefix)?;

        let checks = [
            ("state", self.evaluator.env().observation_dim(), policy.state_dim()),
            ("action", self.policy.action_dim(), policy.action_dim()),
        ];
        for (what, expected, got) in checks {
            if got != expected {
                return Err(OrchestratorError::DimensionMismatch {
                    what,
                    expected,
                    got,
                });
            }
        }

        self.policy = policy;
        Ok(())
    }

    fn sample_deltas(&mut self) -> Vec<Arc<Array2<f32>>> {
        self.policy
            .sample_deltas()
            .into_iter()
            .map(Arc::new)
            .collect()
    }

    /// Ranks the rollouts, updates the policy and measures it.
    ///
    /// `positive[k]` and `negative[k]` are the rewards of `deltas[k]`.
    fn finish_iteration(
        &mut self,
        positive: &[f32],
        negative: &[f32],
        deltas: &[Arc<Array2<f32>>],
    ) -> Result<IterationReport> {
        let std_dev = reward_std(positive, negative);
        let num_best = self.policy.hyperparams().num_best_deltas;
        let best = select_best(positive, negative, deltas, num_best);
        let best_score = best
            .first()
            .map_or(f32::NEG_INFINITY, RolloutResult::score);

        let update = match self.policy.update(&best, std_dev) {
            Ok(()) => UpdateOutcome::Applied,
            Err(MlErr::DegenerateRewards { std_dev }) => {
                warn!(std_dev = std_dev; "every reward is the same, skipping the update");
                UpdateOutcome::Skipped
            }
            Err(e) => return Err(e.into()),
        };

        let deployment_reward = self.deploy(None)?;
        info!(
            reward = deployment_reward,
            best_score = best_score,
            reward_std = std_dev;
            "iteration done"
        );

        Ok(IterationReport {
            deployment_reward,
            update,
            best_score,
            reward_std: std_dev,
        })
    }
}

/// Explores every delta in one direction, one per worker.
async fn explore_all(
    workers: &mut [WorkerHandle],
    policy: &Arc<PolicySnapshot>,
    deltas: &[Arc<Array2<f32>>],
    direction: Direction,
) -> Result<Vec<f32>> {
    for (worker, delta) in workers.iter_mut().zip(deltas) {
        let job = ExploreJob {
            policy: Arc::clone(policy),
            direction,
            delta: Arc::clone(delta),
        };
        worker.send(Command::Explore(job)).await?;
    }

    debug!("dispatched {} {direction} rollouts", deltas.len());

    let mut rewards = Vec::with_capacity(deltas.len());
    for worker in workers.iter_mut() {
        rewards.push(worker.recv_reward().await?);
    }

    Ok(rewards)
}

#[cfg(test)]
mod tests {
    use ml_core::{Evaluate, PointMass, Transition};

    use super::*;

    fn hyperparams(num_deltas: usize, num_best_deltas: usize) -> Hyperparams {
        Hyperparams {
            num_deltas,
            num_best_deltas,
            episode_steps: 5,
            noise_scale: 0.1,
            ..Default::default()
        }
    }

    fn agent(num_deltas: usize, num_best_deltas: usize) -> Agent<PointMass> {
        let env = PointMass::new(vec![0.5], 1.0);
        Agent::new(
            env,
            hyperparams(num_deltas, num_best_deltas),
            1,
            NormalizationMode::Disabled,
        )
        .unwrap()
    }

    /// Counts the episodes it's used for.
    struct Counting {
        inner: PointMass,
        resets: usize,
        steps: usize,
    }

    impl Environment for Counting {
        fn reset(&mut self) -> Vec<f32> {
            self.resets += 1;
            self.inner.reset()
        }

        fn step(&mut self, action: &[f32]) -> Transition {
            self.steps += 1;
            self.inner.step(action)
        }

        fn observation_dim(&self) -> usize {
            self.inner.observation_dim()
        }

        fn action_bound(&self) -> f32 {
            self.inner.action_bound()
        }
    }

    /// Pays the same reward whatever the action.
    struct Flat;

    impl Environment for Flat {
        fn reset(&mut self) -> Vec<f32> {
            vec![1.0]
        }

        fn step(&mut self, _action: &[f32]) -> Transition {
            Transition {
                state: vec![1.0],
                reward: 0.5,
                done: false,
                info: None,
            }
        }

        fn observation_dim(&self) -> usize {
            1
        }

        fn action_bound(&self) -> f32 {
            1.0
        }
    }

    #[test]
    fn one_iteration_on_a_point_mass() {
        let env = Counting {
            inner: PointMass::new(vec![0.5], 1.0),
            resets: 0,
            steps: 0,
        };
        let mut agent = Agent::new(env, hyperparams(2, 2), 1, NormalizationMode::Disabled).unwrap();

        let report = agent.train_iteration().unwrap();

        // 2 deltas explored in both directions plus the final deployment.
        assert_eq!(agent.env().resets, 5);
        assert!(agent.env().steps <= 5 * 5);
        assert!(report.deployment_reward.is_finite());
        assert_eq!(report.update, UpdateOutcome::Applied);
        assert_ne!(agent.policy().weights(), Array2::<f32>::zeros((1, 1)).view());
    }

    #[test]
    fn train_returns_a_bounded_reward() {
        let mut agent = agent(2, 1);
        let reward = agent.train().unwrap();
        assert!((-5.0..=5.0).contains(&reward));
    }

    #[test]
    fn flat_rewards_skip_the_update() {
        let mut agent = Agent::new(Flat, hyperparams(3, 2), 1, NormalizationMode::Enabled).unwrap();

        let report = agent.train_iteration().unwrap();
        assert_eq!(report.update, UpdateOutcome::Skipped);
        assert_eq!(report.reward_std, 0.0);
        assert_eq!(agent.policy().weights(), Array2::<f32>::zeros((1, 1)).view());
    }

    #[tokio::test]
    async fn parallel_training_requires_a_pool() {
        let mut agent = agent(2, 2);
        let err = agent.train_parallel(&mut []).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NoWorkerPool));
    }

    #[test]
    fn invalid_hyperparams_fail_on_construction() {
        let env = PointMass::new(vec![0.0], 1.0);
        let err = Agent::new(env, hyperparams(1, 2), 1, NormalizationMode::Enabled)
            .err()
            .unwrap();

        assert!(matches!(err, OrchestratorError::Ml(MlErr::InvalidHyperparams(_))));
    }

    #[test]
    fn loading_a_policy_for_other_states_fails() {
        let prefix = std::env::temp_dir().join(format!("agent_dims_{}", std::process::id()));

        let wide = Agent::new(
            PointMass::new(vec![0.0, 0.0, 0.0], 1.0),
            hyperparams(2, 2),
            1,
            NormalizationMode::Enabled,
        )
        .unwrap();
        let path = wide.save(&prefix).unwrap();

        let mut narrow = agent(2, 2);
        let err = narrow.load(&prefix).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::DimensionMismatch {
                what: "state",
                expected: 1,
                got: 3
            }
        ));
        assert_eq!(narrow.policy().state_dim(), 1);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn loading_a_policy_for_other_actions_fails() {
        let prefix = std::env::temp_dir().join(format!("agent_actions_{}", std::process::id()));

        let env = PointMass::new(vec![0.5], 1.0);
        let wide = Agent::new(env, hyperparams(2, 2), 3, NormalizationMode::Disabled).unwrap();
        let path = wide.save(&prefix).unwrap();

        let mut narrow = agent(2, 2);
        let err = narrow.load(&prefix).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::DimensionMismatch {
                what: "action",
                expected: 1,
                got: 3
            }
        ));
        assert_eq!(narrow.policy().action_dim(), 1);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn deploying_a_misshaped_delta_fails() {
        let mut agent = agent(2, 2);
        let delta = Array2::ones((2, 2));

        let err = agent
            .deploy(Some(Perturbation::positive(&delta)))
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Ml(MlErr::SizeMismatch { what: "delta", .. })
        ));
    }
}

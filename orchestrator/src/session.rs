use log::{info, warn};
use ml_core::Environment;
use tokio_util::sync::CancellationToken;

use crate::{
    OrchestratorError, Result,
    agent::{Agent, IterationReport},
    configs::{CheckpointConfig, TrainingConfig},
    pool::WorkerPool,
};

/// Represents an ongoing training session.
/// It lets its owner drive the agent and its worker pool from a single instance.
pub struct Session<E> {
    agent: Agent<E>,
    pool: Option<WorkerPool>,
    checkpoint: Option<CheckpointConfig>,
    cancel: CancellationToken,
    iterations: usize,
    /// Set once a parallel iteration fails, the pool is only joined afterwards.
    failed: bool,
}

impl<E> Session<E>
where
    E: Environment + 'static,
{
    /// Creates a new `Session`.
    ///
    /// In parallel mode the worker pool is spawned and reset before returning.
    ///
    /// # Arguments
    /// * `config` - The training configuration.
    /// * `env_factory` - Builds the coordinator's environment and one per worker.
    /// * `cancel` - Stops the training between iterations and every worker.
    ///
    /// # Returns
    /// A new `Session` or an error if the configuration is invalid or a worker
    /// couldn't be reset.
    pub async fn new<F>(
        config: TrainingConfig,
        mut env_factory: F,
        cancel: CancellationToken,
    ) -> Result<Self>
    where
        F: FnMut() -> E,
    {
        config.validate()?;

        let agent = Agent::new(
            env_factory(),
            config.hyperparams.clone(),
            config.action_dim.get(),
            config.normalization,
        )?;

        let pool = match config.worker_count() {
            Some(workers) => {
                let envs: Vec<E> = (0..workers).map(|_| env_factory()).collect();
                let mut pool = WorkerPool::spawn(envs, config.pool_config(), cancel.child_token());
                pool.reset_all().await?;
                Some(pool)
            }
            None => None,
        };

        Ok(Self {
            agent,
            pool,
            checkpoint: config.checkpoint,
            cancel,
            iterations: 0,
            failed: false,
        })
    }

    pub fn agent(&self) -> &Agent<E> {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut Agent<E> {
        &mut self.agent
    }

    pub fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }

    /// The amount of iterations run so far.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Runs up to `iterations` training iterations.
    ///
    /// Stops early once cancelled, an iteration that fails because the
    /// workers were cancelled under it is not reported as an error.
    ///
    /// # Returns
    /// The deployment reward of every finished iteration, or `SessionFailed`
    /// if an earlier parallel iteration failed.
    pub async fn run(&mut self, iterations: usize) -> Result<Vec<f32>> {
        if self.failed {
            return Err(OrchestratorError::SessionFailed);
        }

        let mut history = Vec::with_capacity(iterations);

        for _ in 0..iterations {
            if self.cancel.is_cancelled() {
                warn!("training cancelled after {} iteration(s)", self.iterations);
                break;
            }

            let report = match self.step().await {
                Ok(report) => report,
                Err(e) if self.cancel.is_cancelled() => {
                    warn!("iteration interrupted by cancellation: {e}");
                    break;
                }
                Err(e) => {
                    self.failed = self.pool.is_some();
                    return Err(e);
                }
            };

            self.iterations += 1;
            history.push(report.deployment_reward);
            info!(
                iteration = self.iterations,
                reward = report.deployment_reward;
                "{:?} update", report.update
            );

            self.maybe_checkpoint()?;
        }

        Ok(history)
    }

    /// Closes the worker pool, if any.
    ///
    /// After cancellation or a failed iteration the workers are only joined,
    /// they shut down on their own once their channels are dropped.
    pub async fn close(self) -> Result<()> {
        let Some(pool) = self.pool else {
            return Ok(());
        };

        let metrics = if self.cancel.is_cancelled() || self.failed {
            pool.join().await?
        } else {
            pool.close().await?
        };

        let episodes: u64 = metrics.iter().map(|m| m.episodes).sum();
        info!("workers closed after {episodes} episode(s)");
        Ok(())
    }

    async fn step(&mut self) -> Result<IterationReport> {
        match self.pool.as_mut() {
            Some(pool) => {
                self.agent
                    .train_parallel_iteration(pool.handles_mut())
                    .await
            }
            None => self.agent.train_iteration(),
        }
    }

    fn maybe_checkpoint(&self) -> Result<()> {
        let Some(checkpoint) = &self.checkpoint else {
            return Ok(());
        };

        if self.iterations % checkpoint.every.get() == 0 {
            let path = self.agent.save(&checkpoint.prefix)?;
            info!(iteration = self.iterations, path:? = path; "checkpoint saved");
        }

        Ok(())
    }
}

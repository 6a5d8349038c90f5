use std::time::Instant;

use comms::{Command, ExploreJob, Polled, Reply, WorkerEnd};
use log::{debug, info, warn};
use ml_core::{Environment, Evaluator, MlErr};
use tokio::task;
use tokio_util::sync::CancellationToken;

use crate::{Result, WorkerConfig, WorkerErr, WorkerMetrics};

/// Explores perturbations of the coordinator's policy on a private environment.
///
/// The worker owns its environment and its local normalizer. Episodes are
/// CPU bound so they run on Tokio's blocking pool, the evaluator is moved
/// in and out of it on every request to satisfy `'static`.
pub struct Worker<E> {
    worker_id: usize,
    cfg: WorkerConfig,
    evaluator: Option<Evaluator<E>>,
    metrics: WorkerMetrics,
    cancel: CancellationToken,
}

impl<E> Worker<E>
where
    E: Environment + 'static,
{
    /// Creates a new `Worker`.
    ///
    /// # Args
    /// * `worker_id` - Identifier used for observability.
    /// * `env` - The environment this worker exclusively owns.
    /// * `cfg` - The worker's execution settings.
    /// * `cancel` - Stops the worker once cancelled, even mid-episode.
    ///
    /// # Returns
    /// A new worker instance.
    pub fn new(worker_id: usize, env: E, cfg: WorkerConfig, cancel: CancellationToken) -> Self {
        Self {
            worker_id,
            evaluator: Some(Evaluator::new(env, cfg.normalization())),
            metrics: WorkerMetrics::default(),
            cfg,
            cancel,
        }
    }

    /// Serves the coordinator's requests until told to close.
    ///
    /// The inbox is polled with the configured interval so the worker never
    /// blocks indefinitely. Cancellation is noticed between requests and
    /// before every step of a running episode.
    ///
    /// # Args
    /// * `endpoint` - The worker's end of the coordinator channel.
    ///
    /// # Returns
    /// The worker metrics on a `Close` request, cancellation or when the
    /// coordinator goes away.
    ///
    /// # Errors
    /// Returns `WorkerErr` if an episode fails, the endpoint is dropped so the
    /// coordinator notices the lost worker.
    pub async fn run(mut self, mut endpoint: WorkerEnd) -> Result<WorkerMetrics> {
        let worker_id = self.worker_id;
        self.evaluator_mut()?.reset_env();
        info!(worker_id = worker_id; "worker ready");

        loop {
            let polled = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!(worker_id = worker_id; "cancelled, shutting down");
                    break;
                }
                polled = endpoint.poll(self.cfg.poll_interval()) => polled,
            };

            let cmd = match polled {
                Polled::Ready(cmd) => cmd,
                Polled::Idle => continue,
                Polled::Closed => {
                    info!(worker_id = worker_id; "coordinator disconnected");
                    break;
                }
            };

            debug!(worker_id = worker_id, command = cmd.kind(); "received command");

            let (reply, last) = match cmd {
                Command::Reset => {
                    self.evaluator_mut()?.reset_env();
                    self.metrics.bump_reset();
                    (Reply::ResetOk, false)
                }
                Command::Explore(job) => match self.explore(job).await? {
                    Some(reward) => (Reply::Reward(reward), false),
                    None => {
                        info!(worker_id = worker_id; "cancelled mid-episode, shutting down");
                        break;
                    }
                },
                Command::Close => (Reply::CloseOk, true),
            };

            if let Err(e) = endpoint.send(reply).await {
                warn!(worker_id = worker_id; "could not deliver {reply}: {e}");
                break;
            }

            if last {
                info!(worker_id = worker_id; "closed by the coordinator");
                break;
            }
        }

        Ok(self.metrics)
    }

    /// Rolls out a single episode on the blocking pool.
    ///
    /// # Returns
    /// The episode reward or `None` if the worker was cancelled during it.
    async fn explore(&mut self, job: ExploreJob) -> Result<Option<f32>> {
        let mut evaluator = self.evaluator.take().ok_or(WorkerErr::Poisoned {
            worker_id: self.worker_id,
        })?;

        let direction = job.direction;
        let cancel = self.cancel.clone();
        let start = Instant::now();

        let (evaluator, episode) = task::spawn_blocking(move || {
            let episode = evaluator.run_until(&*job.policy, Some(job.perturbation()), || {
                cancel.is_cancelled()
            });
            (evaluator, episode)
        })
        .await?;

        self.evaluator = Some(evaluator);
        let episode = match episode {
            Ok(episode) => episode,
            Err(MlErr::Interrupted) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.metrics.add_episode(episode.steps, start.elapsed());

        debug!(
            worker_id = self.worker_id,
            steps = episode.steps,
            reward = episode.reward;
            "explored {direction} direction"
        );

        Ok(Some(episode.reward))
    }

    fn evaluator_mut(&mut self) -> Result<&mut Evaluator<E>> {
        self.evaluator.as_mut().ok_or(WorkerErr::Poisoned {
            worker_id: self.worker_id,
        })
    }
}

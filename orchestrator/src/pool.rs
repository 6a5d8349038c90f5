//! The fixed pool of workers the coordinator explores with.

use std::time::Duration;

use comms::{Command, CoordinatorEnd, Polled, Reply};
use futures::future;
use log::{debug, info, warn};
use ml_core::Environment;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use worker::{Worker, WorkerConfig, WorkerMetrics};

use crate::{OrchestratorError, Result};

/// Settings shared by every worker of a pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolConfig {
    pub worker: WorkerConfig,
    /// Bound of every reply wait, `None` waits for as long as the worker lives.
    pub reply_timeout: Option<Duration>,
}

/// The coordinator's side of a single worker.
///
/// Keeps count of the requests whose reply hasn't been received yet, a
/// worker answers in order so the next reply always belongs to the oldest one.
#[derive(Debug)]
pub struct WorkerHandle {
    id: usize,
    endpoint: CoordinatorEnd,
    reply_timeout: Option<Duration>,
    pending: usize,
}

impl WorkerHandle {
    pub fn new(id: usize, endpoint: CoordinatorEnd, reply_timeout: Option<Duration>) -> Self {
        Self {
            id,
            endpoint,
            reply_timeout,
            pending: 0,
        }
    }

    /// The amount of requests still waiting for a reply.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Sends a request to the worker.
    ///
    /// # Returns
    /// `WorkerLost` if the worker is gone.
    pub async fn send(&mut self, cmd: Command) -> Result<()> {
        let kind = cmd.kind();
        self.endpoint
            .send(cmd)
            .await
            .map_err(|_| OrchestratorError::WorkerLost { worker_id: self.id })?;

        self.pending += 1;
        debug!(worker_id = self.id, command = kind; "request sent");
        Ok(())
    }

    /// Discards the replies of requests left unanswered by an interrupted batch.
    ///
    /// # Returns
    /// The amount of discarded replies, or the error of the first one that
    /// still can't be received.
    pub async fn settle(&mut self) -> Result<usize> {
        let stale = self.pending;
        while self.pending > 0 {
            let reply = self.recv().await?;
            debug!(worker_id = self.id; "discarded stale reply: {reply}");
        }

        if stale > 0 {
            warn!(worker_id = self.id; "{stale} stale reply(s) discarded");
        }

        Ok(stale)
    }

    /// Waits for the worker's next reply.
    ///
    /// # Returns
    /// The reply, `WorkerLost` if the worker is gone or `ReplyTimeout` if a
    /// timeout is configured and it elapsed.
    pub async fn recv(&mut self) -> Result<Reply> {
        let worker_id = self.id;

        let reply = match self.reply_timeout {
            None => self.endpoint.recv().await,
            Some(timeout) => match self.endpoint.poll(timeout).await {
                Polled::Ready(reply) => Some(reply),
                Polled::Closed => None,
                Polled::Idle => return Err(OrchestratorError::ReplyTimeout { worker_id }),
            },
        };

        let reply = reply.ok_or(OrchestratorError::WorkerLost { worker_id })?;
        self.pending = self.pending.saturating_sub(1);
        Ok(reply)
    }

    /// Waits for the reward of an exploration request.
    pub async fn recv_reward(&mut self) -> Result<f32> {
        match self.recv().await? {
            Reply::Reward(reward) => Ok(reward),
            other => Err(OrchestratorError::Protocol {
                worker_id: self.id,
                expected: "reward",
                got: other.kind(),
            }),
        }
    }

    /// Waits for an acknowledgement.
    ///
    /// # Arguments
    /// * `expected` - Either `Reply::ResetOk` or `Reply::CloseOk`.
    pub async fn recv_ack(&mut self, expected: Reply) -> Result<()> {
        let reply = self.recv().await?;
        if reply.kind() != expected.kind() {
            return Err(OrchestratorError::Protocol {
                worker_id: self.id,
                expected: expected.kind(),
                got: reply.kind(),
            });
        }

        Ok(())
    }
}

/// A bounded set of workers created once and reused on every iteration.
///
/// Every worker exclusively owns one environment and talks to the coordinator
/// through its own channel, workers never talk to each other.
pub struct WorkerPool {
    handles: Vec<WorkerHandle>,
    tasks: Vec<JoinHandle<worker::Result<WorkerMetrics>>>,
}

impl WorkerPool {
    /// Spawns one worker task per environment.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Arguments
    /// * `envs` - The environments, one per worker.
    /// * `cfg` - The pool settings.
    /// * `cancel` - Stops every worker once cancelled.
    ///
    /// # Returns
    /// The pool, handle `k` explores delta `k`.
    pub fn spawn<E, I>(envs: I, cfg: PoolConfig, cancel: CancellationToken) -> Self
    where
        E: Environment + 'static,
        I: IntoIterator<Item = E>,
    {
        let mut handles = Vec::new();
        let mut tasks = Vec::new();

        for (id, env) in envs.into_iter().enumerate() {
            let (coordinator, worker_end) = comms::worker_channel();
            let worker = Worker::new(id, env, cfg.worker, cancel.child_token());

            tasks.push(tokio::spawn(worker.run(worker_end)));
            handles.push(WorkerHandle::new(id, coordinator, cfg.reply_timeout));
        }

        info!("spawned {} worker(s)", handles.len());
        Self { handles, tasks }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn handles_mut(&mut self) -> &mut [WorkerHandle] {
        &mut self.handles
    }

    /// Resets every worker's environment.
    pub async fn reset_all(&mut self) -> Result<()> {
        for handle in &mut self.handles {
            handle.settle().await?;
            handle.send(Command::Reset).await?;
        }

        for handle in &mut self.handles {
            handle.recv_ack(Reply::ResetOk).await?;
        }

        debug!("every worker was reset");
        Ok(())
    }

    /// Closes every worker and waits for their tasks.
    ///
    /// Replies still owed by an interrupted batch are discarded first. Every
    /// task is joined even if some worker misbehaves.
    ///
    /// # Returns
    /// The metrics of every worker or the first error found.
    pub async fn close(mut self) -> Result<Vec<WorkerMetrics>> {
        let mut first_err = None;

        for handle in &mut self.handles {
            if let Err(e) = handle.settle().await {
                first_err.get_or_insert(e);
            }
        }

        for handle in &mut self.handles {
            if let Err(e) = handle.send(Command::Close).await {
                first_err.get_or_insert(e);
            }
        }

        for handle in &mut self.handles {
            // Still behind on an older request, the close ack can't be told apart.
            if handle.pending() != 1 {
                continue;
            }

            if let Err(e) = handle.recv_ack(Reply::CloseOk).await {
                first_err.get_or_insert(e);
            }
        }

        let metrics = self.join().await;
        match first_err {
            Some(e) => Err(e),
            None => metrics,
        }
    }

    /// Drops every channel and waits for the workers to finish on their own.
    ///
    /// Used after cancellation, when the workers might be gone already.
    pub async fn join(mut self) -> Result<Vec<WorkerMetrics>> {
        self.handles.clear();
        let results = future::join_all(self.tasks).await;

        let mut metrics = Vec::with_capacity(results.len());
        for (worker_id, result) in results.into_iter().enumerate() {
            let msg = match result {
                Ok(Ok(m)) => {
                    metrics.push(m);
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };

            warn!(worker_id = worker_id; "worker failed: {msg}");
            return Err(OrchestratorError::WorkerError { worker_id, msg });
        }

        info!("{} worker(s) finished", metrics.len());
        Ok(metrics)
    }
}

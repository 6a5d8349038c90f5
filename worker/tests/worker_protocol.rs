use std::{sync::Arc, time::Duration};

use comms::{Command, CoordinatorEnd, ExploreJob, Reply};
use ml_core::{
    Direction, Environment, Evaluator, Hyperparams, NormalizationMode, Perturbation, PointMass,
    Policy, Transition,
};
use ndarray::{Array2, array};
use tokio::task::JoinHandle;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use worker::{Result, Worker, WorkerConfig, WorkerErr, WorkerMetrics};

fn cfg(normalization: NormalizationMode) -> WorkerConfig {
    WorkerConfig::new(Duration::from_millis(1), normalization)
}

fn policy(state_dim: usize) -> Policy {
    let hyperparams = Hyperparams {
        num_deltas: 1,
        num_best_deltas: 1,
        episode_steps: 5,
        noise_scale: 0.5,
        ..Default::default()
    };

    Policy::new(state_dim, 1, hyperparams).unwrap()
}

fn spawn<E>(env: E, normalization: NormalizationMode) -> (
    CoordinatorEnd,
    CancellationToken,
    JoinHandle<Result<WorkerMetrics>>,
)
where
    E: Environment + 'static,
{
    let (coordinator, worker_end) = comms::worker_channel();
    let cancel = CancellationToken::new();
    let worker = Worker::new(0, env, cfg(normalization), cancel.clone());
    let handle = tokio::spawn(worker.run(worker_end));
    (coordinator, cancel, handle)
}

fn job(policy: &Policy, direction: Direction, delta: Array2<f32>) -> Command {
    Command::Explore(ExploreJob {
        policy: Arc::new(policy.snapshot()),
        direction,
        delta: Arc::new(delta),
    })
}

#[tokio::test]
async fn reset_is_acknowledged() {
    let (mut coordinator, _cancel, handle) =
        spawn(PointMass::new(vec![1.0], 1.0), NormalizationMode::Enabled);

    assert_ok!(coordinator.send(Command::Reset).await);
    assert_eq!(coordinator.recv().await, Some(Reply::ResetOk));

    assert_ok!(coordinator.send(Command::Close).await);
    assert_eq!(coordinator.recv().await, Some(Reply::CloseOk));

    let metrics = assert_ok!(handle.await.unwrap());
    assert_eq!(metrics.resets, 1);
    assert_eq!(metrics.episodes, 0);
}

#[tokio::test]
async fn explore_replies_with_the_episode_reward() {
    let env = PointMass::new(vec![1.0, -2.0], 1.0);
    let (mut coordinator, _cancel, handle) = spawn(env.clone(), NormalizationMode::Disabled);

    let policy = policy(2);
    let delta = array![[1.0, 0.5]];

    let mut local = Evaluator::new(env, NormalizationMode::Disabled);
    let expected = local
        .run(&policy, Some(Perturbation::negative(&delta)))
        .unwrap();

    assert_ok!(coordinator.send(job(&policy, Direction::Negative, delta)).await);
    assert_eq!(coordinator.recv().await, Some(Reply::Reward(expected.reward)));

    assert_ok!(coordinator.send(Command::Close).await);
    assert_eq!(coordinator.recv().await, Some(Reply::CloseOk));

    let metrics = assert_ok!(handle.await.unwrap());
    assert_eq!(metrics.episodes, 1);
    assert_eq!(metrics.steps, 5);
}

#[tokio::test]
async fn requests_are_served_in_order() {
    let (mut coordinator, _cancel, _handle) =
        spawn(PointMass::new(vec![3.0], 1.0), NormalizationMode::Enabled);

    let policy = policy(1);
    for direction in [Direction::Positive, Direction::Negative] {
        assert_ok!(coordinator.send(job(&policy, direction, array![[1.0]])).await);
        let reply = coordinator.recv().await;
        assert!(matches!(reply, Some(Reply::Reward(r)) if r.is_finite()));
    }

    assert_ok!(coordinator.send(Command::Reset).await);
    assert_eq!(coordinator.recv().await, Some(Reply::ResetOk));
}

#[tokio::test]
async fn cancellation_stops_an_idle_worker() {
    let (_coordinator, cancel, handle) =
        spawn(PointMass::new(vec![1.0], 1.0), NormalizationMode::Enabled);

    tokio::time::sleep(Duration::from_millis(5)).await;
    cancel.cancel();

    let metrics = assert_ok!(handle.await.unwrap());
    assert_eq!(metrics, WorkerMetrics::default());
}

#[tokio::test]
async fn dropped_coordinator_ends_the_worker() {
    let (coordinator, _cancel, handle) =
        spawn(PointMass::new(vec![1.0], 1.0), NormalizationMode::Enabled);
    drop(coordinator);

    assert_ok!(handle.await.unwrap());
}

/// Takes a while on every step.
struct Slow;

impl Environment for Slow {
    fn reset(&mut self) -> Vec<f32> {
        vec![1.0]
    }

    fn step(&mut self, _action: &[f32]) -> Transition {
        std::thread::sleep(Duration::from_millis(10));
        Transition {
            state: vec![1.0],
            reward: 0.0,
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

#[tokio::test]
async fn cancellation_interrupts_a_running_episode() {
    let (coordinator, cancel, handle) = spawn(Slow, NormalizationMode::Disabled);

    let hyperparams = Hyperparams {
        num_deltas: 1,
        num_best_deltas: 1,
        episode_steps: 100_000,
        ..Default::default()
    };
    let policy = Policy::new(1, 1, hyperparams).unwrap();
    assert_ok!(coordinator.send(job(&policy, Direction::Positive, array![[1.0]])).await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let finished = tokio::time::timeout(Duration::from_secs(2), handle).await;
    let metrics = assert_ok!(assert_ok!(finished).unwrap());
    assert_eq!(metrics.episodes, 0);
}

/// Reports a state with the wrong dimensionality after the first step.
struct Shrinking;

impl Environment for Shrinking {
    fn reset(&mut self) -> Vec<f32> {
        vec![0.0, 0.0]
    }

    fn step(&mut self, _action: &[f32]) -> Transition {
        Transition {
            state: vec![0.0],
            reward: 0.0,
            done: false,
            info: None,
        }
    }

    fn observation_dim(&self) -> usize {
        2
    }

    fn action_bound(&self) -> f32 {
        1.0
    }
}

#[tokio::test]
async fn failed_episode_drops_the_channel() {
    let (mut coordinator, _cancel, handle) = spawn(Shrinking, NormalizationMode::Disabled);

    let policy = policy(2);
    assert_ok!(coordinator.send(job(&policy, Direction::Positive, array![[1.0, 1.0]])).await);
    assert_eq!(coordinator.recv().await, None);

    let err = assert_err!(handle.await.unwrap());
    assert!(matches!(err, WorkerErr::Ml(_)));
}

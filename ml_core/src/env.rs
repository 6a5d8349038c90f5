//! The simulation environment contract.
//!
//! Environments are owned by exactly one evaluator (the coordinator's or a
//! worker's) and are never shared across concurrent rollouts.

/// The outcome of a single environment step.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: Vec<f32>,
    pub reward: f32,
    pub done: bool,
    pub info: Option<String>,
}

/// A continuous control environment.
pub trait Environment: Send {
    /// Starts a new episode.
    ///
    /// # Returns
    /// The initial state.
    fn reset(&mut self) -> Vec<f32>;

    /// Applies `action` for one step.
    ///
    /// # Arguments
    /// * `action` - An action already clipped to `[-action_bound, action_bound]`.
    ///
    /// # Returns
    /// The next state, the reward and whether the episode is over.
    fn step(&mut self, action: &[f32]) -> Transition;

    /// The dimensionality of the states.
    fn observation_dim(&self) -> usize;

    /// The symmetric bound of every action component.
    fn action_bound(&self) -> f32;
}

impl<E: Environment + ?Sized> Environment for Box<E> {
    fn reset(&mut self) -> Vec<f32> {
        (**self).reset()
    }

    fn step(&mut self, action: &[f32]) -> Transition {
        (**self).step(action)
    }

    fn observation_dim(&self) -> usize {
        (**self).observation_dim()
    }

    fn action_bound(&self) -> f32 {
        (**self).action_bound()
    }
}

/// Deterministic point mass that should be driven to the origin.
///
/// `state' = state + action` and `reward = -sum(|state'|)`. The episode only
/// ends when the evaluator runs out of steps.
#[derive(Debug, Clone)]
pub struct PointMass {
    start: Vec<f32>,
    state: Vec<f32>,
    bound: f32,
}

impl PointMass {
    /// Creates a new `PointMass` environment.
    ///
    /// # Arguments
    /// * `start` - The state every episode starts from, it also sets the dimensionality.
    /// * `bound` - The action bound.
    pub fn new(start: Vec<f32>, bound: f32) -> Self {
        Self {
            state: start.clone(),
            start,
            bound,
        }
    }

    pub fn state(&self) -> &[f32] {
        &self.state
    }
}

impl Environment for PointMass {
    fn reset(&mut self) -> Vec<f32> {
        self.state.clone_from(&self.start);
        self.state.clone()
    }

    fn step(&mut self, action: &[f32]) -> Transition {
        for (x, a) in self.state.iter_mut().zip(action) {
            *x += a;
        }

        Transition {
            state: self.state.clone(),
            reward: -self.state.iter().map(|x| x.abs()).sum::<f32>(),
            done: false,
            info: None,
        }
    }

    fn observation_dim(&self) -> usize {
        self.start.len()
    }

    fn action_bound(&self) -> f32 {
        self.bound
    }
}

use std::time::Duration;

/// Counters collected by a worker over its lifetime.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WorkerMetrics {
    pub episode_time: Duration,

    pub resets: u64,
    pub episodes: u64,
    pub steps: u64,
}

impl WorkerMetrics {
    #[inline]
    pub fn bump_reset(&mut self) {
        self.resets += 1;
    }

    #[inline]
    pub fn add_episode(&mut self, steps: usize, elapsed: Duration) {
        self.episodes += 1;
        self.steps += steps as u64;
        self.episode_time += elapsed;
    }
}

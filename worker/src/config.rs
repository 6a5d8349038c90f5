use std::time::Duration;

use ml_core::NormalizationMode;

/// How long a worker waits on its inbox before checking for cancellation again.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Immutable execution settings for a worker instance.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    poll_interval: Duration,
    normalization: NormalizationMode,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            normalization: NormalizationMode::default(),
        }
    }
}

impl WorkerConfig {
    /// Creates a new worker configuration.
    ///
    /// # Args
    /// * `poll_interval` - The bound of every inbox wait, zero falls back to the default.
    /// * `normalization` - Whether the worker normalizes the states it observes.
    ///
    /// # Returns
    /// A `WorkerConfig` instance.
    pub fn new(poll_interval: Duration, normalization: NormalizationMode) -> Self {
        let poll_interval = if poll_interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            poll_interval
        };

        Self {
            poll_interval,
            normalization,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn normalization(&self) -> NormalizationMode {
        self.normalization
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_uses_default() {
        let cfg = WorkerConfig::new(Duration::ZERO, NormalizationMode::Disabled);
        assert_eq!(cfg.poll_interval(), DEFAULT_POLL_INTERVAL);
        assert_eq!(cfg.normalization(), NormalizationMode::Disabled);
    }
}

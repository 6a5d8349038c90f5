use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use ml_core::{Hyperparams, NormalizationMode};
use serde::Deserialize;
use worker::WorkerConfig;

use crate::{OrchestratorError, Result, pool::PoolConfig};

const DEFAULT_POLL_INTERVAL_MS: u64 = 1;

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// Where the rollouts of each iteration are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModeConfig {
    /// One episode after another on the coordinator's environment.
    #[default]
    Sequential,
    /// On a fixed pool of workers, `num_deltas` of them unless set higher.
    Parallel {
        #[serde(default)]
        workers: Option<NonZeroUsize>,
    },
}

/// Periodic policy checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckpointConfig {
    pub prefix: PathBuf,
    pub every: NonZeroUsize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    #[serde(default)]
    pub hyperparams: Hyperparams,
    pub action_dim: NonZeroUsize,
    #[serde(default)]
    pub mode: ModeConfig,
    pub iterations: NonZeroUsize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub reply_timeout_ms: Option<u64>,
    #[serde(default)]
    pub normalization: NormalizationMode,
    #[serde(default)]
    pub checkpoint: Option<CheckpointConfig>,
}

impl TrainingConfig {
    /// Creates a sequential configuration with default hyperparameters.
    pub fn new(action_dim: NonZeroUsize, iterations: NonZeroUsize) -> Self {
        Self {
            hyperparams: Hyperparams::default(),
            action_dim,
            mode: ModeConfig::default(),
            iterations,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            reply_timeout_ms: None,
            normalization: NormalizationMode::default(),
            checkpoint: None,
        }
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Checks the configuration describes a runnable session.
    ///
    /// # Returns
    /// An `InvalidConfig` error on bad hyperparameters or a pool smaller than `num_deltas`.
    pub fn validate(&self) -> Result<()> {
        self.hyperparams
            .validate()
            .map_err(|e| OrchestratorError::InvalidConfig(e.to_string()))?;

        if let ModeConfig::Parallel {
            workers: Some(workers),
        } = self.mode
            && workers.get() < self.hyperparams.num_deltas
        {
            return Err(OrchestratorError::InvalidConfig(format!(
                "{workers} worker(s) can't explore {} deltas",
                self.hyperparams.num_deltas
            )));
        }

        Ok(())
    }

    /// The amount of workers to spawn, `None` when training sequentially.
    pub fn worker_count(&self) -> Option<usize> {
        match self.mode {
            ModeConfig::Sequential => None,
            ModeConfig::Parallel { workers } => Some(
                workers.map_or(self.hyperparams.num_deltas, |workers| workers.get()),
            ),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            worker: WorkerConfig::new(
                Duration::from_millis(self.poll_interval_ms),
                self.normalization,
            ),
            reply_timeout: self.reply_timeout_ms.map(Duration::from_millis),
        }
    }
}

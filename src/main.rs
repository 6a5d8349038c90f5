use std::{env, num::NonZeroUsize};

use anyhow::Context;
use log::{info, warn};
use ml_core::{NormalizationMode, PointMass};
use orchestrator::{ModeConfig, Session, TrainingConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;

const CONFIG_VAR: &str = "ARS_CONFIG";
const START: [f32; 2] = [1.0, -0.5];
const ACTION_BOUND: f32 = 1.0;
const DEFAULT_ITERATIONS: usize = 20;

fn point_mass() -> PointMass {
    PointMass::new(START.to_vec(), ACTION_BOUND)
}

/// Reads the configuration file named by `ARS_CONFIG` or falls back to a
/// parallel run on the built-in point mass.
fn load_config(path: Option<String>) -> anyhow::Result<TrainingConfig> {
    if let Some(path) = path {
        return TrainingConfig::from_path(&path)
            .with_context(|| format!("failed to load the config at {path}"));
    }

    let action_dim = NonZeroUsize::new(START.len()).context("empty start state")?;
    let iterations = NonZeroUsize::new(DEFAULT_ITERATIONS).context("no iterations")?;
    let mut config = TrainingConfig::new(action_dim, iterations);
    config.mode = ModeConfig::Parallel { workers: None };
    // A point mass standing still normalizes to a zero state, the policy
    // would never move it.
    config.normalization = NormalizationMode::Disabled;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = load_config(env::var(CONFIG_VAR).ok())?;
    let iterations = config.iterations.get();
    info!("training for {iterations} iteration(s) in {:?} mode", config.mode);

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("received SIGINT, stopping after the current iteration");
            token.cancel();
        }
    });

    let mut session = Session::new(config, point_mass, cancel).await?;
    let history = session.run(iterations).await?;
    session.close().await?;

    match history.last() {
        Some(reward) => info!("finished with a deployment reward of {reward}"),
        None => info!("no iteration finished"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;

    #[test]
    fn falls_back_to_the_point_mass() {
        let config = assert_ok!(load_config(None));
        assert_eq!(config.action_dim.get(), START.len());
        assert_eq!(config.worker_count(), Some(config.hyperparams.num_deltas));
        assert_ok!(config.validate());
    }

    #[test]
    fn missing_config_files_are_reported() {
        let path = env::temp_dir().join("ars_missing_config.json");
        assert!(load_config(Some(path.display().to_string())).is_err());
    }

    #[tokio::test]
    async fn fallback_config_trains() {
        let mut config = assert_ok!(load_config(None));
        config.hyperparams.episode_steps = 10;

        let cancel = CancellationToken::new();
        let mut session = assert_ok!(Session::new(config, point_mass, cancel).await);
        let history = assert_ok!(session.run(2).await);
        assert_eq!(history.len(), 2);
        assert_ok!(session.close().await);
    }
}

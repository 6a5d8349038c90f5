mod training;

pub use training::{CheckpointConfig, ModeConfig, TrainingConfig};

pub mod config;
pub mod error;
pub mod metrics;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{Result, WorkerErr};
pub use metrics::WorkerMetrics;
pub use worker::Worker;

//! Configuration validation errors.

use thiserror::Error;

/// Errors produced when resolving a `SupervisorConfig` into settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("scale-down threshold {min} must be below scale-up threshold {max}")]
    ThresholdOrder { min: f64, max: f64 },

    #[error("max_threads must be at least 1")]
    ZeroWorkerBound,

    #[error("scale interval must be nonzero")]
    ZeroInterval,
}

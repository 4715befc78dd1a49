//! Supervisor error types.

use thiserror::Error;

use forkpool_core::ConfigError;

use crate::launcher::LaunchError;

/// Result type alias for supervisor operations.
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Errors surfaced to the hosting application.
///
/// Steady-state tick failures (probe errors, spawn/kill failures) never take
/// this form; they are reported through the event callback and the log so a
/// single bad tick cannot terminate the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A second bootstrap on a controller that has already started.
    #[error("supervisor already running")]
    AlreadyRunning,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("launch error: {0}")]
    Launch(#[from] LaunchError),
}

//! Shared types used across forkpool crates.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a worker process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Spawned but not yet observed by the controller.
    Starting,
    /// Successfully sampled at least once.
    Running,
    /// Selected for removal; kill in flight.
    Terminating,
    /// Kill confirmed; about to leave the registry.
    Terminated,
}

/// Passive record describing one running worker process.
///
/// Handles are exclusively owned by the controller's registry; everything
/// else sees point-in-time clones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerHandle {
    /// OS process id, assigned at spawn time.
    pub id: u32,
    pub state: WorkerState,
    /// Unix timestamp (seconds) when the process was spawned.
    pub spawned_at: u64,
}

impl WorkerHandle {
    /// Create a handle for a freshly spawned process.
    pub fn new(id: u32) -> Self {
        Self {
            id,
            state: WorkerState::Starting,
            spawned_at: epoch_secs(),
        }
    }

    /// Whether the worker is still a live member of the pool.
    pub fn is_active(&self) -> bool {
        matches!(self.state, WorkerState::Starting | WorkerState::Running)
    }
}

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

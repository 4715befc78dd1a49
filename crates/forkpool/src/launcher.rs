//! Process lifecycle primitive and startup role resolution.
//!
//! The controller and its workers are the same executable: `NativeLauncher`
//! re-executes the current binary with a marker variable in the child's
//! environment, and `current_role` reads that marker at startup. The spawned
//! child sees the marker and resolves to `Role::Worker`; the original process
//! resolves to `Role::Controller`.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

use forkpool_core::WorkerHandle;

/// Environment marker identifying a spawned worker process.
pub const WORKER_ENV: &str = "FORKPOOL_WORKER";

/// Which side of the fork this process is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Controller,
    Worker,
}

/// Resolve this process's role from its environment.
pub fn current_role() -> Role {
    role_from_marker(std::env::var(WORKER_ENV).ok().as_deref())
}

fn role_from_marker(marker: Option<&str>) -> Role {
    match marker {
        Some(value) if !value.is_empty() => Role::Worker,
        _ => Role::Controller,
    }
}

/// Errors from the process lifecycle collaborator.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("process clustering unsupported: {0}")]
    Unsupported(String),

    #[error("failed to spawn worker: {0}")]
    Spawn(std::io::Error),

    #[error("failed to kill worker {pid}: {source}")]
    Kill { pid: u32, source: std::io::Error },

    #[error("unknown worker: {0}")]
    UnknownWorker(u32),
}

/// Boxed future returned by `ProcessLauncher` implementations.
pub type LaunchFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, LaunchError>> + Send + 'a>>;

/// Spawns and terminates worker processes.
///
/// Both operations are awaited to completion from the controller's point of
/// view; in particular `kill` must not resolve until the process is gone, so
/// a killed worker can never be resampled.
pub trait ProcessLauncher: Send + Sync {
    fn spawn(&self) -> LaunchFuture<'_, WorkerHandle>;
    fn kill<'a>(&'a self, worker: &'a WorkerHandle) -> LaunchFuture<'a, ()>;
}

/// Production launcher: re-executes the current binary as a sibling process.
///
/// Child process handles stay inside the launcher; the registry only ever
/// holds passive `WorkerHandle` records. Dropping the launcher does not kill
/// the children, so an embedder that wants a clean exit must go through the
/// supervisor's shutdown path.
pub struct NativeLauncher {
    program: PathBuf,
    children: Mutex<HashMap<u32, Child>>,
}

impl NativeLauncher {
    /// Fails with `Unsupported` on hosts without a usable process primitive.
    pub fn new() -> Result<Self, LaunchError> {
        if cfg!(target_family = "wasm") {
            return Err(LaunchError::Unsupported(
                "no process spawning on wasm targets".to_string(),
            ));
        }

        let program = std::env::current_exe().map_err(|e| {
            LaunchError::Unsupported(format!("cannot resolve current executable: {e}"))
        })?;

        Ok(Self {
            program,
            children: Mutex::new(HashMap::new()),
        })
    }

    async fn spawn_child(&self) -> Result<WorkerHandle, LaunchError> {
        let mut child = Command::new(&self.program)
            .env(WORKER_ENV, "1")
            .stdin(Stdio::null())
            .spawn()
            .map_err(LaunchError::Spawn)?;

        let Some(pid) = child.id() else {
            return Err(LaunchError::Spawn(std::io::Error::other(
                "worker exited before its pid could be read",
            )));
        };

        self.children.lock().await.insert(pid, child);
        info!(pid, "worker process spawned");
        Ok(WorkerHandle::new(pid))
    }

    async fn kill_child(&self, pid: u32) -> Result<(), LaunchError> {
        let mut child = self
            .children
            .lock()
            .await
            .remove(&pid)
            .ok_or(LaunchError::UnknownWorker(pid))?;

        // kill() delivers the signal and reaps the child.
        if let Err(source) = child.kill().await {
            // Possibly still alive; put the handle back for a retry.
            self.children.lock().await.insert(pid, child);
            return Err(LaunchError::Kill { pid, source });
        }

        debug!(pid, "worker process terminated");
        Ok(())
    }
}

impl ProcessLauncher for NativeLauncher {
    fn spawn(&self) -> LaunchFuture<'_, WorkerHandle> {
        Box::pin(self.spawn_child())
    }

    fn kill<'a>(&'a self, worker: &'a WorkerHandle) -> LaunchFuture<'a, ()> {
        Box::pin(self.kill_child(worker.id))
    }
}

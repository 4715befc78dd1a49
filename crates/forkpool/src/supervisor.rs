//! Supervisor — role dispatch, bootstrap, and the control-loop lifecycle.
//!
//! The hosting application builds a `Supervisor` with its configuration and
//! entry points and calls `start()` from both the original process and every
//! spawned worker (they run the same binary). The worker side runs its entry
//! and returns; the controller side bootstraps the pool and, when scaling is
//! enabled, drives the recurring tick until `shutdown()`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use forkpool_core::{SupervisorConfig, WorkerHandle};
use forkpool_probe::{SysinfoProbe, UsageProbe};

use crate::controller::{EventCallback, PoolController, PoolEvent};
use crate::error::SupervisorResult;
use crate::launcher::{LaunchError, NativeLauncher, ProcessLauncher, Role, current_role};

/// Boxed future for entry points.
pub type BoxFuture<T = ()> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A role entry point, invoked at most once.
pub type EntryFn = Box<dyn FnOnce() -> BoxFuture + Send>;

/// What `Supervisor::start` resolved to.
pub enum Started {
    /// This process is a worker; its entry has run to completion and it takes
    /// no part in scaling.
    Worker,
    /// This process is the controller; the pool is live.
    Controller(SupervisorHandle),
    /// The platform has no process primitive: the master entry ran in this
    /// process and no pool exists.
    Degraded,
}

/// Builder facade over the pool controller.
pub struct Supervisor {
    config: SupervisorConfig,
    master: Option<EntryFn>,
    worker: Option<EntryFn>,
    on_event: Option<EventCallback>,
    launcher: Option<Arc<dyn ProcessLauncher>>,
    probe: Option<Arc<dyn UsageProbe>>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            master: None,
            worker: None,
            on_event: None,
            launcher: None,
            probe: None,
        }
    }

    /// Entry point invoked once by the controller process.
    pub fn with_master(mut self, entry: EntryFn) -> Self {
        self.master = Some(entry);
        self
    }

    /// Entry point invoked once by each worker process. Workers without one
    /// fall back to the master entry.
    pub fn with_worker(mut self, entry: EntryFn) -> Self {
        self.worker = Some(entry);
        self
    }

    /// Callback for pool lifecycle events.
    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.on_event = Some(callback);
        self
    }

    /// Replace the process launcher (defaults to `NativeLauncher`).
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Replace the usage probe (defaults to `SysinfoProbe`).
    pub fn with_probe(mut self, probe: Arc<dyn UsageProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Resolve this process's role and run it.
    pub async fn start(self) -> SupervisorResult<Started> {
        self.start_as(current_role()).await
    }

    async fn start_as(mut self, role: Role) -> SupervisorResult<Started> {
        match role {
            Role::Worker => {
                // Workers run their entry and are done here; the work
                // transport is the hosting application's concern.
                if let Some(entry) = self.worker.take().or(self.master.take()) {
                    entry().await;
                }
                Ok(Started::Worker)
            }
            Role::Controller => self.start_controller().await,
        }
    }

    async fn start_controller(mut self) -> SupervisorResult<Started> {
        if let Some(entry) = self.master.take() {
            entry().await;
        }

        let launcher = match self.launcher.take() {
            Some(launcher) => launcher,
            None => match NativeLauncher::new() {
                Ok(launcher) => Arc::new(launcher) as Arc<dyn ProcessLauncher>,
                Err(LaunchError::Unsupported(reason)) => {
                    error!(%reason, "process clustering unavailable, running degraded");
                    if let Some(callback) = &self.on_event {
                        callback(PoolEvent::ScalingUnavailable { reason });
                    }
                    return Ok(Started::Degraded);
                }
                Err(e) => return Err(e.into()),
            },
        };
        let probe = self
            .probe
            .take()
            .unwrap_or_else(|| Arc::new(SysinfoProbe::new()) as Arc<dyn UsageProbe>);

        let mut controller = PoolController::new(&self.config, launcher, probe)?;
        if let Some(callback) = self.on_event.take() {
            controller = controller.with_event_callback(callback);
        }
        let registry_rx = controller.subscribe();

        controller.bootstrap().await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(controller.run(shutdown_rx));
        info!("supervisor started");

        Ok(Started::Controller(SupervisorHandle {
            shutdown_tx,
            task,
            registry_rx,
        }))
    }
}

/// Handle to a running controller.
pub struct SupervisorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    registry_rx: watch::Receiver<Vec<WorkerHandle>>,
}

impl SupervisorHandle {
    /// Point-in-time snapshot of the worker registry.
    pub fn workers(&self) -> Vec<WorkerHandle> {
        self.registry_rx.borrow().clone()
    }

    /// Stop the control loop and terminate the remaining workers.
    ///
    /// An in-flight tick is allowed to complete; no new tick is scheduled
    /// after the stop request. Dropping the handle without calling this
    /// leaves the worker processes running.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use crate::launcher::LaunchFuture;

    struct NoopLauncher;

    impl ProcessLauncher for NoopLauncher {
        fn spawn(&self) -> LaunchFuture<'_, WorkerHandle> {
            static NEXT: AtomicU32 = AtomicU32::new(1);
            Box::pin(async { Ok(WorkerHandle::new(NEXT.fetch_add(1, Ordering::SeqCst))) })
        }

        fn kill<'a>(&'a self, _worker: &'a WorkerHandle) -> LaunchFuture<'a, ()> {
            Box::pin(async { Ok(()) })
        }
    }

    fn flag_entry(flag: &Arc<AtomicBool>) -> EntryFn {
        let flag = Arc::clone(flag);
        Box::new(move || {
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test]
    async fn worker_role_runs_worker_entry() {
        let master_ran = Arc::new(AtomicBool::new(false));
        let worker_ran = Arc::new(AtomicBool::new(false));

        let started = Supervisor::new(SupervisorConfig::default())
            .with_master(flag_entry(&master_ran))
            .with_worker(flag_entry(&worker_ran))
            .start_as(Role::Worker)
            .await
            .unwrap();

        assert!(matches!(started, Started::Worker));
        assert!(worker_ran.load(Ordering::SeqCst));
        assert!(!master_ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn worker_role_falls_back_to_master_entry() {
        let master_ran = Arc::new(AtomicBool::new(false));

        let started = Supervisor::new(SupervisorConfig::default())
            .with_master(flag_entry(&master_ran))
            .start_as(Role::Worker)
            .await
            .unwrap();

        assert!(matches!(started, Started::Worker));
        assert!(master_ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn controller_role_runs_master_entry_and_bootstraps() {
        let master_ran = Arc::new(AtomicBool::new(false));

        let config = SupervisorConfig {
            threads: Some(2),
            scale: None,
        };
        let started = Supervisor::new(config)
            .with_master(flag_entry(&master_ran))
            .with_launcher(Arc::new(NoopLauncher))
            .start_as(Role::Controller)
            .await
            .unwrap();

        assert!(master_ran.load(Ordering::SeqCst));
        let Started::Controller(handle) = started else {
            panic!("expected controller role");
        };
        assert_eq!(handle.workers().len(), 2);
        handle.shutdown().await;
    }
}

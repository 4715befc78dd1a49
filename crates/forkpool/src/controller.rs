//! Pool controller — owns the worker registry and drives the tick.
//!
//! The registry has exactly one writer: the controller task. Ticks are
//! awaited inline in the control loop, so tick *N+1* cannot begin sampling
//! before tick *N*'s decision has been applied; no locking is needed beyond
//! that. Diagnostics read point-in-time snapshots published on a watch
//! channel after every mutation, never the live registry.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use forkpool_core::{ScaleSettings, SupervisorConfig, WorkerHandle, WorkerState};
use forkpool_probe::UsageProbe;
use forkpool_scale::{AggregateOutcome, ScaleDecision, Sampler, decide};

use crate::error::{SupervisorError, SupervisorResult};
use crate::launcher::ProcessLauncher;

/// Observable pool lifecycle events.
///
/// Spawn and kill failures are reported here (and logged) rather than
/// propagated: a failed tick step must not terminate the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    WorkerSpawned { pid: u32 },
    WorkerStopped { pid: u32 },
    SpawnFailed { error: String },
    KillFailed { pid: u32, error: String },
    ScalingUnavailable { reason: String },
}

/// Callback invoked for every `PoolEvent`.
pub type EventCallback = Arc<dyn Fn(PoolEvent) + Send + Sync>;

/// What one tick observed and decided.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub outcome: AggregateOutcome,
    pub decision: ScaleDecision,
}

/// Owns the worker registry, runs the recurring tick, and applies scaling
/// decisions through the launcher.
pub struct PoolController {
    launcher: Arc<dyn ProcessLauncher>,
    sampler: Sampler,
    settings: ScaleSettings,
    scaling_enabled: bool,
    thread_count: u32,
    /// Insertion order = spawn order; scale-down pops from the back.
    registry: Vec<WorkerHandle>,
    registry_tx: watch::Sender<Vec<WorkerHandle>>,
    on_event: Option<EventCallback>,
    started: bool,
}

impl PoolController {
    /// Create a controller from a validated configuration.
    pub fn new(
        config: &SupervisorConfig,
        launcher: Arc<dyn ProcessLauncher>,
        probe: Arc<dyn UsageProbe>,
    ) -> SupervisorResult<Self> {
        let settings = config.scale_settings()?;
        let (registry_tx, _) = watch::channel(Vec::new());

        Ok(Self {
            launcher,
            sampler: Sampler::new(probe, settings.probe_timeout),
            scaling_enabled: config.scaling_enabled(),
            thread_count: config.thread_count(),
            settings,
            registry: Vec::new(),
            registry_tx,
            on_event: None,
            started: false,
        })
    }

    /// Set the callback used to report pool events.
    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.on_event = Some(callback);
        self
    }

    /// Subscribe to registry snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Vec<WorkerHandle>> {
        self.registry_tx.subscribe()
    }

    /// Point-in-time copy of the registry.
    pub fn workers(&self) -> Vec<WorkerHandle> {
        self.registry.clone()
    }

    /// Spawn the initial pool: `thread_count` workers when scaling is
    /// disabled, a single worker otherwise.
    ///
    /// Runs exactly once per controller lifetime; a second call fails with
    /// `AlreadyRunning`. The guard is per-instance, not process-global, so
    /// independent controllers never cross-contaminate.
    pub async fn bootstrap(&mut self) -> SupervisorResult<()> {
        if self.started {
            return Err(SupervisorError::AlreadyRunning);
        }
        self.started = true;

        let seed = if self.scaling_enabled {
            1
        } else {
            self.thread_count.max(1)
        };

        for _ in 0..seed {
            let mut handle = self.launcher.spawn().await?;
            if !self.scaling_enabled {
                // No tick will ever sample this worker; consider it live now.
                handle.state = WorkerState::Running;
            }
            self.emit(PoolEvent::WorkerSpawned { pid: handle.id });
            self.registry.push(handle);
        }

        info!(
            workers = self.registry.len(),
            scaling = self.scaling_enabled,
            "pool bootstrapped"
        );
        self.publish();
        Ok(())
    }

    /// One sample → decide → apply cycle.
    pub async fn tick(&mut self) -> TickReport {
        let snapshot = self.registry.clone();
        let sample = self.sampler.sample(&snapshot).await;

        // First successful sample moves a worker out of Starting.
        for pid in sample.sampled_pids() {
            if let Some(worker) = self.registry.iter_mut().find(|w| w.id == pid)
                && worker.state == WorkerState::Starting
            {
                worker.state = WorkerState::Running;
            }
        }

        let outcome = sample.aggregate();
        let decision = decide(&outcome, self.registry.len(), &self.settings);
        debug!(?outcome, ?decision, pool = self.registry.len(), "tick");

        match decision {
            ScaleDecision::ScaleUp => self.scale_up().await,
            ScaleDecision::ScaleDown => self.scale_down().await,
            ScaleDecision::Hold => {}
        }

        self.publish();
        TickReport { outcome, decision }
    }

    /// The recurring control loop. Only ticks while scaling is enabled; a
    /// fixed-size pool just waits for shutdown. Either way the remaining
    /// workers are terminated once the shutdown signal arrives.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        if self.scaling_enabled {
            info!(
                interval_ms = self.settings.interval.as_millis() as u64,
                max_workers = self.settings.max_workers,
                "scaling loop started"
            );

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.interval) => {
                        // Awaited inline: ticks are strictly serialized, and a
                        // tick that overruns the interval delays the next one.
                        self.tick().await;
                    }
                    _ = shutdown.changed() => {
                        info!("scaling loop shutting down");
                        break;
                    }
                }
            }
        } else {
            let _ = shutdown.changed().await;
        }

        self.teardown().await;
    }

    async fn scale_up(&mut self) {
        match self.launcher.spawn().await {
            Ok(handle) => {
                debug!(pid = handle.id, pool = self.registry.len() + 1, "scaled up");
                self.emit(PoolEvent::WorkerSpawned { pid: handle.id });
                self.registry.push(handle);
            }
            Err(e) => {
                warn!(error = %e, "worker spawn failed, pool unchanged");
                self.emit(PoolEvent::SpawnFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    /// Remove the most recently spawned worker (LIFO), leaving the
    /// longest-lived workers undisturbed. The samples from this tick would
    /// also support a least-loaded policy; LIFO is the deliberate baseline.
    async fn scale_down(&mut self) {
        let Some(mut handle) = self.registry.pop() else {
            return;
        };
        let previous = handle.state;
        handle.state = WorkerState::Terminating;

        match self.launcher.kill(&handle).await {
            Ok(()) => {
                handle.state = WorkerState::Terminated;
                debug!(pid = handle.id, pool = self.registry.len(), "scaled down");
                self.emit(PoolEvent::WorkerStopped { pid: handle.id });
            }
            Err(e) => {
                // Possibly still alive: keep it registered and resampled.
                warn!(pid = handle.id, error = %e, "worker kill failed, keeping it registered");
                self.emit(PoolEvent::KillFailed {
                    pid: handle.id,
                    error: e.to_string(),
                });
                handle.state = previous;
                self.registry.push(handle);
            }
        }
    }

    async fn teardown(&mut self) {
        while let Some(mut handle) = self.registry.pop() {
            handle.state = WorkerState::Terminating;
            match self.launcher.kill(&handle).await {
                Ok(()) => self.emit(PoolEvent::WorkerStopped { pid: handle.id }),
                Err(e) => {
                    warn!(pid = handle.id, error = %e, "failed to stop worker during shutdown");
                }
            }
        }
        info!("pool stopped");
        self.publish();
    }

    fn emit(&self, event: PoolEvent) {
        if let Some(callback) = &self.on_event {
            callback(event);
        }
    }

    fn publish(&self) {
        self.registry_tx.send_replace(self.registry.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use forkpool_core::{ScaleOption, ScaleOverrides};
    use forkpool_probe::{ProbeError, ProbeFuture};

    use crate::launcher::{LaunchError, LaunchFuture};

    /// Launcher that hands out sequential pids and records every call.
    struct MockLauncher {
        next_pid: AtomicU32,
        killed: Mutex<Vec<u32>>,
        fail_spawn: AtomicBool,
        fail_kill: AtomicBool,
    }

    impl MockLauncher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                next_pid: AtomicU32::new(100),
                killed: Mutex::new(Vec::new()),
                fail_spawn: AtomicBool::new(false),
                fail_kill: AtomicBool::new(false),
            })
        }

        fn killed(&self) -> Vec<u32> {
            self.killed.lock().unwrap().clone()
        }
    }

    impl ProcessLauncher for MockLauncher {
        fn spawn(&self) -> LaunchFuture<'_, WorkerHandle> {
            Box::pin(async move {
                if self.fail_spawn.load(Ordering::SeqCst) {
                    return Err(LaunchError::Spawn(std::io::Error::other("spawn refused")));
                }
                let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
                Ok(WorkerHandle::new(pid))
            })
        }

        fn kill<'a>(&'a self, worker: &'a WorkerHandle) -> LaunchFuture<'a, ()> {
            Box::pin(async move {
                if self.fail_kill.load(Ordering::SeqCst) {
                    return Err(LaunchError::Kill {
                        pid: worker.id,
                        source: std::io::Error::other("kill refused"),
                    });
                }
                self.killed.lock().unwrap().push(worker.id);
                Ok(())
            })
        }
    }

    /// Probe reporting one adjustable CPU value for every pid, or failing
    /// outright when the value is cleared.
    struct FixedProbe {
        cpu: Mutex<Option<f64>>,
    }

    impl FixedProbe {
        fn new(cpu: f64) -> Arc<Self> {
            Arc::new(Self {
                cpu: Mutex::new(Some(cpu)),
            })
        }

        fn set(&self, cpu: f64) {
            *self.cpu.lock().unwrap() = Some(cpu);
        }

        fn fail_all(&self) {
            *self.cpu.lock().unwrap() = None;
        }
    }

    impl UsageProbe for FixedProbe {
        fn cpu_percent(&self, pid: u32) -> ProbeFuture<'_> {
            Box::pin(async move {
                let cpu = *self.cpu.lock().unwrap();
                cpu.ok_or(ProbeError::NoSuchProcess(pid))
            })
        }
    }

    fn scaling_config(max_workers: u32) -> SupervisorConfig {
        SupervisorConfig {
            threads: None,
            scale: Some(ScaleOption::Overrides(ScaleOverrides {
                max_threads: Some(max_workers),
                min_threshold: Some(10.0),
                max_threshold: Some(40.0),
                ..ScaleOverrides::default()
            })),
        }
    }

    fn fixed_config(threads: u32) -> SupervisorConfig {
        SupervisorConfig {
            threads: Some(threads),
            scale: None,
        }
    }

    fn controller(
        config: &SupervisorConfig,
        launcher: &Arc<MockLauncher>,
        probe: &Arc<FixedProbe>,
    ) -> PoolController {
        PoolController::new(
            config,
            Arc::clone(launcher) as Arc<dyn ProcessLauncher>,
            Arc::clone(probe) as Arc<dyn UsageProbe>,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn bootstrap_disabled_spawns_fixed_pool() {
        let launcher = MockLauncher::new();
        let probe = FixedProbe::new(0.0);
        let mut pool = controller(&fixed_config(4), &launcher, &probe);

        pool.bootstrap().await.unwrap();

        let workers = pool.workers();
        assert_eq!(workers.len(), 4);
        assert!(workers.iter().all(|w| w.state == WorkerState::Running));
    }

    #[tokio::test]
    async fn bootstrap_enabled_spawns_single_seed() {
        let launcher = MockLauncher::new();
        let probe = FixedProbe::new(0.0);
        let mut pool = controller(&scaling_config(4), &launcher, &probe);

        pool.bootstrap().await.unwrap();

        let workers = pool.workers();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].state, WorkerState::Starting);
    }

    #[tokio::test]
    async fn second_bootstrap_is_already_running() {
        let launcher = MockLauncher::new();
        let probe = FixedProbe::new(0.0);
        let mut pool = controller(&scaling_config(4), &launcher, &probe);

        pool.bootstrap().await.unwrap();
        assert!(matches!(
            pool.bootstrap().await,
            Err(SupervisorError::AlreadyRunning)
        ));
    }

    #[tokio::test]
    async fn bootstrap_guard_is_per_instance() {
        let launcher = MockLauncher::new();
        let probe = FixedProbe::new(0.0);

        let mut first = controller(&scaling_config(4), &launcher, &probe);
        let mut second = controller(&scaling_config(4), &launcher, &probe);

        first.bootstrap().await.unwrap();
        // A sibling controller instance carries its own guard.
        second.bootstrap().await.unwrap();
    }

    #[tokio::test]
    async fn busy_tick_grows_the_pool() {
        let launcher = MockLauncher::new();
        let probe = FixedProbe::new(55.0);
        let mut pool = controller(&scaling_config(4), &launcher, &probe);
        pool.bootstrap().await.unwrap();

        let report = pool.tick().await;

        assert_eq!(report.decision, ScaleDecision::ScaleUp);
        assert_eq!(pool.workers().len(), 2);
    }

    #[tokio::test]
    async fn tick_at_max_holds() {
        let launcher = MockLauncher::new();
        let probe = FixedProbe::new(90.0);
        let mut pool = controller(&scaling_config(4), &launcher, &probe);
        pool.bootstrap().await.unwrap();

        for _ in 0..3 {
            pool.tick().await;
        }
        assert_eq!(pool.workers().len(), 4);

        let report = pool.tick().await;
        assert_eq!(report.decision, ScaleDecision::Hold);
        assert_eq!(pool.workers().len(), 4);
    }

    #[tokio::test]
    async fn idle_tick_at_floor_holds() {
        let launcher = MockLauncher::new();
        let probe = FixedProbe::new(2.0);
        let mut pool = controller(&scaling_config(4), &launcher, &probe);
        pool.bootstrap().await.unwrap();

        let report = pool.tick().await;

        assert_eq!(report.decision, ScaleDecision::Hold);
        assert_eq!(pool.workers().len(), 1);
    }

    #[tokio::test]
    async fn all_probes_failing_holds() {
        let launcher = MockLauncher::new();
        let probe = FixedProbe::new(90.0);
        let mut pool = controller(&scaling_config(8), &launcher, &probe);
        pool.bootstrap().await.unwrap();
        pool.tick().await;
        pool.tick().await;
        let before = pool.workers();

        probe.fail_all();
        let report = pool.tick().await;

        assert_eq!(report.outcome, AggregateOutcome::NoData);
        assert_eq!(report.decision, ScaleDecision::Hold);
        assert_eq!(pool.workers().len(), before.len());
    }

    #[tokio::test]
    async fn scale_down_removes_most_recent_worker() {
        let launcher = MockLauncher::new();
        let probe = FixedProbe::new(90.0);
        let mut pool = controller(&scaling_config(4), &launcher, &probe);
        pool.bootstrap().await.unwrap();
        pool.tick().await;
        pool.tick().await;

        let last_spawned = pool.workers().last().unwrap().id;

        probe.set(1.0);
        let report = pool.tick().await;

        assert_eq!(report.decision, ScaleDecision::ScaleDown);
        assert_eq!(launcher.killed(), vec![last_spawned]);
        assert!(pool.workers().iter().all(|w| w.id != last_spawned));
    }

    #[tokio::test]
    async fn hold_ticks_never_mutate_the_registry() {
        let launcher = MockLauncher::new();
        let probe = FixedProbe::new(25.0); // dead zone
        let mut pool = controller(&scaling_config(4), &launcher, &probe);
        pool.bootstrap().await.unwrap();
        pool.tick().await; // marks the seed Running

        let before = pool.workers();
        for _ in 0..5 {
            let report = pool.tick().await;
            assert_eq!(report.decision, ScaleDecision::Hold);
        }
        assert_eq!(pool.workers(), before);
    }

    #[tokio::test]
    async fn registry_stays_within_bounds_for_any_input() {
        let launcher = MockLauncher::new();
        let probe = FixedProbe::new(0.0);
        let mut pool = controller(&scaling_config(3), &launcher, &probe);
        pool.bootstrap().await.unwrap();

        let script = [95.0, 95.0, 95.0, 95.0, 25.0, 1.0, 1.0, 1.0, 1.0, 95.0, 1.0];
        for cpu in script {
            probe.set(cpu);
            pool.tick().await;
            let len = pool.workers().len();
            assert!((1..=3).contains(&len), "pool size {len} out of bounds");
        }
    }

    #[tokio::test]
    async fn spawn_failure_reported_without_registry_change() {
        let launcher = MockLauncher::new();
        let probe = FixedProbe::new(90.0);
        let events: Arc<Mutex<Vec<PoolEvent>>> = Arc::default();
        let sink = Arc::clone(&events);

        let mut pool = controller(&scaling_config(4), &launcher, &probe)
            .with_event_callback(Arc::new(move |event| sink.lock().unwrap().push(event)));
        pool.bootstrap().await.unwrap();

        launcher.fail_spawn.store(true, Ordering::SeqCst);
        pool.tick().await;

        assert_eq!(pool.workers().len(), 1);
        assert!(
            events
                .lock()
                .unwrap()
                .iter()
                .any(|e| matches!(e, PoolEvent::SpawnFailed { .. }))
        );
    }

    #[tokio::test]
    async fn kill_failure_keeps_worker_registered() {
        let launcher = MockLauncher::new();
        let probe = FixedProbe::new(90.0);
        let events: Arc<Mutex<Vec<PoolEvent>>> = Arc::default();
        let sink = Arc::clone(&events);

        let mut pool = controller(&scaling_config(4), &launcher, &probe)
            .with_event_callback(Arc::new(move |event| sink.lock().unwrap().push(event)));
        pool.bootstrap().await.unwrap();
        pool.tick().await;
        assert_eq!(pool.workers().len(), 2);

        launcher.fail_kill.store(true, Ordering::SeqCst);
        probe.set(1.0);
        pool.tick().await;

        // Still registered, still sampled next tick.
        let workers = pool.workers();
        assert_eq!(workers.len(), 2);
        assert!(workers.iter().all(|w| w.state != WorkerState::Terminating));
        assert!(
            events
                .lock()
                .unwrap()
                .iter()
                .any(|e| matches!(e, PoolEvent::KillFailed { .. }))
        );
        assert!(launcher.killed().is_empty());
    }

    #[tokio::test]
    async fn first_successful_sample_marks_worker_running() {
        let launcher = MockLauncher::new();
        let probe = FixedProbe::new(25.0);
        let mut pool = controller(&scaling_config(4), &launcher, &probe);
        pool.bootstrap().await.unwrap();
        assert_eq!(pool.workers()[0].state, WorkerState::Starting);

        pool.tick().await;
        assert_eq!(pool.workers()[0].state, WorkerState::Running);
    }

    #[tokio::test]
    async fn snapshots_track_mutations() {
        let launcher = MockLauncher::new();
        let probe = FixedProbe::new(90.0);
        let mut pool = controller(&scaling_config(4), &launcher, &probe);
        let rx = pool.subscribe();

        pool.bootstrap().await.unwrap();
        assert_eq!(rx.borrow().len(), 1);

        pool.tick().await;
        assert_eq!(rx.borrow().len(), 2);
    }
}

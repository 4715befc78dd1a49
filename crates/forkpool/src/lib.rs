//! forkpool — adaptive worker-process pool supervision.
//!
//! One process (the controller) spawns sibling worker processes, periodically
//! samples their CPU usage, and grows or shrinks the pool between a floor of
//! one worker and a configured cap. Two thresholds with a dead zone between
//! them keep the pool from thrashing when the mean hovers near a boundary.
//!
//! # Architecture
//!
//! ```text
//! Supervisor (role dispatch, builder)
//!   ├── Role::Worker → run worker entry, done
//!   └── Role::Controller
//!       ├── PoolController (registry, tick loop)
//!       │   ├── Sampler → AggregateOutcome     (forkpool-scale)
//!       │   ├── decide() → ScaleDecision       (forkpool-scale)
//!       │   └── ProcessLauncher (spawn / kill)
//!       ├── UsageProbe (per-pid CPU)           (forkpool-probe)
//!       └── SupervisorHandle (snapshots, shutdown)
//! ```
//!
//! Consumed as an embeddable library: the hosting application supplies the
//! master/worker entry points and calls [`Supervisor::start`] from both
//! sides of the fork.

pub mod controller;
pub mod error;
pub mod launcher;
pub mod supervisor;

pub use controller::{EventCallback, PoolController, PoolEvent, TickReport};
pub use error::{SupervisorError, SupervisorResult};
pub use launcher::{
    LaunchError, LaunchFuture, NativeLauncher, ProcessLauncher, Role, WORKER_ENV, current_role,
};
pub use supervisor::{BoxFuture, EntryFn, Started, Supervisor, SupervisorHandle};

pub use forkpool_core::{
    ConfigError, ScaleOption, ScaleOverrides, ScaleSettings, SupervisorConfig, WorkerHandle,
    WorkerState,
};
pub use forkpool_probe::{ProbeError, ProbeFuture, SysinfoProbe, UsageProbe};
pub use forkpool_scale::{AggregateOutcome, SampleError, SampleResult, Sampler, ScaleDecision, decide};

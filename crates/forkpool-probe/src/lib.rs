//! forkpool-probe — per-process CPU usage sampling.
//!
//! Defines the `UsageProbe` collaborator interface consumed by the sampler,
//! plus the production implementation over `sysinfo`. A probe call answers
//! "what share of a core is this pid using right now", and may fail when the
//! pid no longer exists; the sampler treats such failures as isolated.

pub mod probe;

pub use probe::{ProbeError, ProbeFuture, SysinfoProbe, UsageProbe};

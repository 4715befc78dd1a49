//! forkpool-scale — tick sampling and the scaling decision.
//!
//! One control-loop tick runs in two stages, both here:
//!
//! ```text
//! Sampler::sample(workers)          concurrent probe per worker,
//!   → SampleResult                  per-worker failures isolated
//!   → aggregate()                   mean over successful samples only
//!   → decide(outcome, size, cfg)    pure hysteresis policy
//!   → ScaleUp | ScaleDown | Hold
//! ```
//!
//! The two thresholds leave a dead zone between them that absorbs noise: a
//! single threshold would add and remove a worker on alternating ticks once
//! the mean hovers near the boundary. `NoData` (every probe failed, or the
//! pool was empty at snapshot time) always maps to `Hold` — no information is
//! not the same as zero load.

pub mod policy;
pub mod sampler;

pub use policy::{ScaleDecision, decide};
pub use sampler::{AggregateOutcome, SampleError, SampleResult, Sampler};

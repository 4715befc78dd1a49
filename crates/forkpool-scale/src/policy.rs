//! The scaling decision: a pure function over one tick's aggregate.

use forkpool_core::ScaleSettings;

use crate::sampler::AggregateOutcome;

/// What the controller should do with the pool this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Spawn one worker.
    ScaleUp,
    /// Kill the most recently spawned worker.
    ScaleDown,
    /// No change.
    Hold,
}

/// Decide whether to grow, shrink, or hold the pool.
///
/// Rules, evaluated in order:
/// 1. `NoData` holds: an uninformative tick is not evidence of idleness.
/// 2. Mean above the scale-up threshold grows the pool, unless already at
///    `max_workers`.
/// 3. Mean below the scale-down threshold shrinks the pool, unless already at
///    the floor of one worker.
/// 4. Anything in the dead zone between the thresholds holds.
pub fn decide(
    outcome: &AggregateOutcome,
    pool_size: usize,
    settings: &ScaleSettings,
) -> ScaleDecision {
    let mean = match outcome {
        AggregateOutcome::NoData => return ScaleDecision::Hold,
        AggregateOutcome::Mean { value, .. } => *value,
    };

    if mean > settings.scale_up_threshold && (pool_size as u32) < settings.max_workers {
        ScaleDecision::ScaleUp
    } else if mean < settings.scale_down_threshold && pool_size > 1 {
        ScaleDecision::ScaleDown
    } else {
        ScaleDecision::Hold
    }
}

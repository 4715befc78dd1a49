//! Per-tick sampling fan-out with per-worker failure isolation.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

use forkpool_core::WorkerHandle;
use forkpool_probe::{ProbeError, UsageProbe};

/// Why a single worker's sample is missing from the aggregate.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("probe timed out")]
    TimedOut,
}

/// The per-tick sample set: pid → CPU percentage or failure.
///
/// Ephemeral; never persisted between ticks.
#[derive(Debug)]
pub struct SampleResult {
    samples: Vec<(u32, Result<f64, SampleError>)>,
}

/// Aggregate of one tick's successful samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateOutcome {
    /// Arithmetic mean over `sampled` successfully probed workers.
    Mean { value: f64, sampled: usize },
    /// Every probe failed, or there was nothing to probe.
    NoData,
}

impl SampleResult {
    /// Mean CPU over successful samples only. The divisor is the success
    /// count, never the pre-tick worker count, which may differ once probes
    /// have failed.
    pub fn aggregate(&self) -> AggregateOutcome {
        let mut sum = 0.0;
        let mut sampled = 0usize;
        for (_, result) in &self.samples {
            if let Ok(cpu) = result {
                sum += cpu;
                sampled += 1;
            }
        }

        if sampled == 0 {
            AggregateOutcome::NoData
        } else {
            AggregateOutcome::Mean {
                value: sum / sampled as f64,
                sampled,
            }
        }
    }

    /// Pids that yielded a successful sample this tick.
    pub fn sampled_pids(&self) -> impl Iterator<Item = u32> + '_ {
        self.samples
            .iter()
            .filter(|(_, result)| result.is_ok())
            .map(|(pid, _)| *pid)
    }

    /// Number of workers whose probe failed or timed out.
    pub fn failure_count(&self) -> usize {
        self.samples
            .iter()
            .filter(|(_, result)| result.is_err())
            .count()
    }
}

/// Fans out one usage query per worker for a single tick and collects the
/// results.
///
/// Queries run as independent tasks and are joined before the tick proceeds;
/// a probe that errors, times out, or panics only loses that worker's sample.
pub struct Sampler {
    probe: Arc<dyn UsageProbe>,
    probe_timeout: Duration,
}

impl Sampler {
    pub fn new(probe: Arc<dyn UsageProbe>, probe_timeout: Duration) -> Self {
        Self {
            probe,
            probe_timeout,
        }
    }

    /// Probe every worker in the snapshot concurrently.
    pub async fn sample(&self, workers: &[WorkerHandle]) -> SampleResult {
        let mut set = JoinSet::new();
        for worker in workers {
            let probe = Arc::clone(&self.probe);
            let pid = worker.id;
            let per_probe = self.probe_timeout;
            set.spawn(async move {
                let result = match timeout(per_probe, probe.cpu_percent(pid)).await {
                    Ok(Ok(cpu)) => Ok(cpu),
                    Ok(Err(e)) => Err(SampleError::Probe(e)),
                    Err(_) => Err(SampleError::TimedOut),
                };
                (pid, result)
            });
        }

        let mut samples = Vec::with_capacity(workers.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((pid, result)) => {
                    if let Err(e) = &result {
                        debug!(pid, error = %e, "probe failed, excluding from aggregate");
                    }
                    samples.push((pid, result));
                }
                Err(e) => {
                    // A panicked probe task loses its sample, nothing else.
                    warn!(error = %e, "probe task aborted");
                }
            }
        }

        SampleResult { samples }
    }
}

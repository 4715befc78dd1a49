//! CPU usage probe over a long-lived `sysinfo::System`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use thiserror::Error;
use tracing::trace;

/// Errors from a single usage query.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no such process: {0}")]
    NoSuchProcess(u32),

    #[error("usage probe unavailable: {0}")]
    Unavailable(String),
}

/// Boxed future returned by `UsageProbe` implementations.
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<f64, ProbeError>> + Send + 'a>>;

/// Asynchronous CPU-utilization probe for an arbitrary process id.
///
/// Called once per worker per tick; implementations must be cheap and must
/// fail (rather than hang) when the pid has already exited.
pub trait UsageProbe: Send + Sync {
    /// CPU utilization of `pid` as a percentage of one core.
    fn cpu_percent(&self, pid: u32) -> ProbeFuture<'_>;
}

/// Production probe backed by `sysinfo`.
///
/// Keeps one `System` for the probe's lifetime: sysinfo derives CPU usage
/// from the delta between two refreshes of the same process entry, so the
/// first sample for any pid reads 0%. Callers see that as a valid low sample,
/// which at worst delays the first scale-up by one tick.
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn sample(&self, pid: u32) -> Result<f64, ProbeError> {
        let mut system = self
            .system
            .lock()
            .map_err(|e| ProbeError::Unavailable(e.to_string()))?;

        let target = Pid::from_u32(pid);
        let refreshed = system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[target]),
            true,
            ProcessRefreshKind::nothing().with_cpu(),
        );
        if refreshed == 0 {
            return Err(ProbeError::NoSuchProcess(pid));
        }

        let process = system
            .process(target)
            .ok_or(ProbeError::NoSuchProcess(pid))?;
        let cpu = f64::from(process.cpu_usage());
        trace!(pid, cpu, "sampled process");
        Ok(cpu)
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageProbe for SysinfoProbe {
    fn cpu_percent(&self, pid: u32) -> ProbeFuture<'_> {
        // The refresh is a quick procfs read; done inline on the calling task.
        Box::pin(async move { self.sample(pid) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_own_process() {
        let probe = SysinfoProbe::new();
        let pid = std::process::id();

        let cpu = probe.sample(pid).unwrap();
        assert!(cpu >= 0.0);

        // A second sample against the same System also succeeds.
        let cpu = probe.sample(pid).unwrap();
        assert!(cpu >= 0.0);
    }

    #[test]
    fn missing_pid_fails() {
        let probe = SysinfoProbe::new();

        // Far above any real pid range.
        let err = probe.sample(u32::MAX - 7).unwrap_err();
        assert!(matches!(err, ProbeError::NoSuchProcess(_)));
    }
}

//! Supervisor configuration parser.
//!
//! All options are optional with documented fallbacks, so an empty config is
//! a valid one (fixed pool sized to the machine's cores, no scaling). The
//! `scale` option accepts either a bare boolean or a table of overrides:
//!
//! ```toml
//! threads = 4
//!
//! [scale]
//! interval = 250
//! max_threads = 8
//! min_threshold = 10.0
//! max_threshold = 40.0
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Tick period when scaling is enabled, in milliseconds.
pub const DEFAULT_INTERVAL_MS: u64 = 500;
/// Upper bound on pool size.
pub const DEFAULT_MAX_WORKERS: u32 = 16;
/// Mean CPU % below which a worker is removed.
pub const DEFAULT_SCALE_DOWN_THRESHOLD: f64 = 10.0;
/// Mean CPU % above which a worker is added.
pub const DEFAULT_SCALE_UP_THRESHOLD: f64 = 40.0;

/// Top-level supervisor configuration.
///
/// The master/worker entry points are not part of this struct; they are
/// closures installed on the `Supervisor` builder by the hosting application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Fixed pool size when scaling is disabled.
    #[serde(alias = "thread_count")]
    pub threads: Option<u32>,
    /// Adaptive scaling: absent/`false` disables, `true` enables with
    /// defaults, a table enables with overrides.
    pub scale: Option<ScaleOption>,
}

/// The `scale` option: a toggle or a structured override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScaleOption {
    Toggle(bool),
    Overrides(ScaleOverrides),
}

/// Per-field overrides for the scaling loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScaleOverrides {
    /// Tick period in milliseconds.
    pub interval: Option<u64>,
    /// Upper bound on pool size.
    #[serde(alias = "max_workers")]
    pub max_threads: Option<u32>,
    /// Mean CPU % below which a worker is removed.
    #[serde(alias = "scale_down_threshold")]
    pub min_threshold: Option<f64>,
    /// Mean CPU % above which a worker is added.
    #[serde(alias = "scale_up_threshold")]
    pub max_threshold: Option<f64>,
    /// Per-probe timeout in milliseconds. Falls back to the tick interval.
    pub probe_timeout: Option<u64>,
}

/// Resolved scaling parameters, immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleSettings {
    pub interval: Duration,
    pub max_workers: u32,
    pub scale_down_threshold: f64,
    pub scale_up_threshold: f64,
    pub probe_timeout: Duration,
}

impl Default for ScaleSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            max_workers: DEFAULT_MAX_WORKERS,
            scale_down_threshold: DEFAULT_SCALE_DOWN_THRESHOLD,
            scale_up_threshold: DEFAULT_SCALE_UP_THRESHOLD,
            probe_timeout: Duration::from_millis(DEFAULT_INTERVAL_MS),
        }
    }
}

impl SupervisorConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SupervisorConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Fixed pool size when scaling is disabled. Falls back to the number of
    /// available CPU cores.
    pub fn thread_count(&self) -> u32 {
        self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1)
        })
    }

    /// Whether adaptive scaling is enabled.
    pub fn scaling_enabled(&self) -> bool {
        match &self.scale {
            None | Some(ScaleOption::Toggle(false)) => false,
            Some(ScaleOption::Toggle(true)) | Some(ScaleOption::Overrides(_)) => true,
        }
    }

    /// Resolve the scaling parameters, applying fallbacks and validating the
    /// threshold ordering invariant.
    ///
    /// A `min_threshold` at or above `max_threshold` would make the policy
    /// oscillate every tick, so it is rejected here rather than at tick time.
    pub fn scale_settings(&self) -> Result<ScaleSettings, ConfigError> {
        let overrides = match &self.scale {
            Some(ScaleOption::Overrides(o)) => o.clone(),
            _ => ScaleOverrides::default(),
        };

        let interval_ms = overrides.interval.unwrap_or(DEFAULT_INTERVAL_MS);
        if interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }

        let max_workers = overrides.max_threads.unwrap_or(DEFAULT_MAX_WORKERS);
        if max_workers == 0 {
            return Err(ConfigError::ZeroWorkerBound);
        }

        let min = overrides
            .min_threshold
            .unwrap_or(DEFAULT_SCALE_DOWN_THRESHOLD);
        let max = overrides
            .max_threshold
            .unwrap_or(DEFAULT_SCALE_UP_THRESHOLD);
        if min >= max {
            return Err(ConfigError::ThresholdOrder { min, max });
        }

        Ok(ScaleSettings {
            interval: Duration::from_millis(interval_ms),
            max_workers,
            scale_down_threshold: min,
            scale_up_threshold: max,
            probe_timeout: Duration::from_millis(
                overrides.probe_timeout.unwrap_or(interval_ms),
            ),
        })
    }
}

pub mod config;
pub mod error;
pub mod types;

pub use config::{ScaleOption, ScaleOverrides, ScaleSettings, SupervisorConfig};
pub use error::ConfigError;
pub use types::*;

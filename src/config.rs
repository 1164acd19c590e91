use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default bound on the depth of recursive connector triggering.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Execution settings shared by every runner of a pipeline.
///
/// All fields are optional when deserializing, missing ones fall back to
/// [`Config::default`].
///
/// ```rust
/// let config = nodeflow::Config::from_json(r#"{ "max_depth": 64, "cycle_timeout_ms": 40 }"#)?;
/// assert_eq!(config.max_depth, 64);
/// # Ok::<(), nodeflow::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of nested connector triggers in one dependency chain.
    pub max_depth: usize,
    /// Deadline applied to each cycle, in milliseconds.
    pub cycle_timeout_ms: Option<u64>,
    /// Drive independent subgraphs on the rayon thread pool.
    pub parallel: bool,
    /// Show a progress bar for multi-cycle runs.
    pub progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            cycle_timeout_ms: None,
            parallel: false,
            progress: false,
        }
    }
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn cycle_timeout(&self) -> Option<Duration> {
        self.cycle_timeout_ms.map(Duration::from_millis)
    }
}

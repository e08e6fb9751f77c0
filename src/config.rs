use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Engine tunables. Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Initial value of the loop-budget global.
    pub loop_budget: i64,
    /// Name of the loop-budget global the code generator decrements.
    pub loop_trap_name: String,
    /// Per-`step()` instruction cap; `None` disables the watchdog.
    pub max_instructions_per_step: Option<u64>,
    pub random_seed: u64,
    pub max_call_depth: usize,
    pub batch: BatchConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            loop_budget: 1000,
            loop_trap_name: "loopTrap".to_string(),
            max_instructions_per_step: None,
            random_seed: 0x5eed,
            max_call_depth: 256,
            batch: BatchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Yield to the scheduler after this many `step()` calls.
    pub yield_every: u32,
    pub yield_for_ms: u64,
    /// Interleave testcases instead of running them one after another.
    pub concurrent: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig { yield_every: 64, yield_for_ms: 5, concurrent: false }
    }
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config = Self::from_json_str(&text)?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }
}

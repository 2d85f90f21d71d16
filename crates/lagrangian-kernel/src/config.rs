//! Configuration types for a tracing run.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceError};

/// Top-level tracer configuration.
///
/// Every rank must run with the same model counts; the wire stride is derived
/// from them. Loaded from TOML or JSON at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Shape of the integration state
    pub model: ModelConfig,

    /// Steps after which a particle is stopped with `MaxStepsReached`
    pub max_steps: Option<u64>,

    /// Order in which the local queue is worked
    pub queue_order: QueueOrder,

    /// Particle messages buffered per rank mailbox
    pub channel_capacity: usize,

    /// Integration steps between progress reports (0 disables them)
    pub progress_interval: u64,
}

/// Variable counts of the integration model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Independent variables per particle; the first three are the position.
    pub number_of_variables: usize,

    pub number_of_tracked_user_data: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueOrder {
    #[default]
    Fifo,
    Lifo,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            max_steps: Some(10_000),
            queue_order: QueueOrder::Fifo,
            channel_capacity: 1024,
            progress_interval: 500,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            // position + velocity
            number_of_variables: 6,
            number_of_tracked_user_data: 0,
        }
    }
}

impl TracerConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TraceError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;

        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&text)
                .map_err(|e| TraceError::InvalidConfig(format!("{}: {}", path.display(), e)))?,
            Some("json") => serde_json::from_str(&text)
                .map_err(|e| TraceError::InvalidConfig(format!("{}: {}", path.display(), e)))?,
            _ => {
                return Err(TraceError::InvalidConfig(format!(
                    "{}: expected a .toml or .json file",
                    path.display()
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.number_of_variables < 3 {
            return Err(TraceError::InvalidConfig(format!(
                "number_of_variables must be at least 3 (the position), got {}",
                self.model.number_of_variables
            )));
        }
        if self.channel_capacity == 0 {
            return Err(TraceError::InvalidConfig(
                "channel_capacity must be positive".to_string(),
            ));
        }
        if self.max_steps == Some(0) {
            return Err(TraceError::InvalidConfig(
                "max_steps must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

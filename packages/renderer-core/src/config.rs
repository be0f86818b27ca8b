//! Renderer configuration: pool sizes, reservoir thresholds, ramp/gorge durations.
//!
//! Loadable from YAML with environment-variable overrides, mirroring the pattern
//! used by this codebase's standalone server binary.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RendererError, RendererResult};

/// Sizes for the per-kind message pools (§4.1).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Cells preallocated for `AudioEncoded` messages.
    pub audio_encoded_cells: usize,
    /// Cells preallocated for `AudioPcm` messages.
    pub audio_pcm_cells: usize,
    /// Cells preallocated for all other (control) message kinds, combined.
    pub control_cells: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            audio_encoded_cells: 512,
            audio_pcm_cells: 512,
            control_cells: 64,
        }
    }
}

impl PoolConfig {
    fn validate(&self) -> RendererResult<()> {
        if self.audio_encoded_cells == 0 || self.audio_pcm_cells == 0 || self.control_cells == 0 {
            return Err(RendererError::Configuration(
                "pool cell counts must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

/// Reservoir byte/time thresholds (§4.2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservoirConfig {
    /// Encoded reservoir capacity in bytes before the protocol blocks on push.
    pub encoded_reservoir_bytes: usize,
    /// Gorge threshold in milliseconds (non-real-time modes only).
    pub gorge_ms: u32,
    /// Rewinder capacity in bytes; exceeding it aborts codec recognition.
    pub rewinder_capacity_bytes: usize,
}

impl Default for ReservoirConfig {
    fn default() -> Self {
        Self {
            encoded_reservoir_bytes: 64 * 1024,
            gorge_ms: 100,
            rewinder_capacity_bytes: 32 * 1024,
        }
    }
}

impl ReservoirConfig {
    fn validate(&self) -> RendererResult<()> {
        if self.encoded_reservoir_bytes == 0 || self.rewinder_capacity_bytes == 0 {
            return Err(RendererError::Configuration(
                "reservoir byte thresholds must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

/// Ramp durations applied on every audible transition (§4.5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RampConfig {
    /// Ramp duration in milliseconds, applied by Skipper/Waiter/Stopper/Muter.
    pub ramp_duration_ms: u32,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self { ramp_duration_ms: 30 }
    }
}

impl RampConfig {
    fn validate(&self) -> RendererResult<()> {
        if !(20..=50).contains(&self.ramp_duration_ms) {
            return Err(RendererError::Configuration(format!(
                "ramp_duration_ms {} outside the documented 20-50ms range",
                self.ramp_duration_ms
            )));
        }
        Ok(())
    }
}

/// Repairer (reorder/resend) timing knobs (§4.9).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Upper bound of the randomised initial resend timeout, in milliseconds.
    pub initial_timeout_max_ms: u32,
    /// Fixed timeout for subsequent resend attempts, in milliseconds.
    pub subsequent_timeout_ms: u32,
    /// Maximum number of out-of-order frames buffered before `RepairerBufferFull`.
    pub max_backlog: usize,
    /// Maximum frame ids included in a single resend request.
    pub max_resend_per_request: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            initial_timeout_max_ms: 80,
            subsequent_timeout_ms: 40,
            max_backlog: 64,
            max_resend_per_request: 32,
        }
    }
}

impl RepairConfig {
    fn validate(&self) -> RendererResult<()> {
        if self.max_backlog == 0 || self.max_resend_per_request == 0 {
            return Err(RendererError::Configuration(
                "repair backlog/resend limits must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

/// Top-level renderer configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pools: PoolConfig,
    pub reservoirs: ReservoirConfig,
    pub ramp: RampConfig,
    pub repair: RepairConfig,
    /// Channel capacity used for the bounded mpsc link between adjacent stages.
    pub stage_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pools: PoolConfig::default(),
            reservoirs: ReservoirConfig::default(),
            ramp: RampConfig::default(),
            repair: RepairConfig::default(),
            stage_channel_capacity: 256,
        }
    }
}

impl Config {
    /// Validates all nested sections, rejecting zero/nonsensical values.
    pub fn validate(&self) -> RendererResult<()> {
        self.pools.validate()?;
        self.reservoirs.validate()?;
        self.ramp.validate()?;
        self.repair.validate()?;
        if self.stage_channel_capacity == 0 {
            return Err(RendererError::Configuration(
                "stage_channel_capacity must be nonzero".into(),
            ));
        }
        Ok(())
    }

    /// Loads configuration from a YAML file (or defaults if `path` is `None`),
    /// then applies `RENDERER_`-prefixed environment variable overrides and
    /// validates the result, mirroring this codebase's standalone server
    /// config-loading convention (§10.3).
    pub fn load(path: Option<&Path>) -> RendererResult<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path).map_err(|e| {
                RendererError::Configuration(format!(
                    "failed to read config file {}: {e}",
                    path.display()
                ))
            })?;
            serde_yaml::from_str(&content).map_err(|e| {
                RendererError::Configuration(format!(
                    "failed to parse config file {}: {e}",
                    path.display()
                ))
            })?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("RENDERER_STAGE_CHANNEL_CAPACITY") {
            if let Ok(n) = val.parse() {
                self.stage_channel_capacity = n;
            }
        }
        if let Ok(val) = std::env::var("RENDERER_ENCODED_RESERVOIR_BYTES") {
            if let Ok(n) = val.parse() {
                self.reservoirs.encoded_reservoir_bytes = n;
            }
        }
        if let Ok(val) = std::env::var("RENDERER_GORGE_MS") {
            if let Ok(n) = val.parse() {
                self.reservoirs.gorge_ms = n;
            }
        }
        if let Ok(val) = std::env::var("RENDERER_RAMP_DURATION_MS") {
            if let Ok(n) = val.parse() {
                self.ramp.ramp_duration_ms = n;
            }
        }
    }
}

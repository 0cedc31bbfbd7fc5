use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

/// Default base-state cadence in video frames.
pub const DEFAULT_FRAMES_PER_BASE_STATE: u32 = 45;
/// Default rewind arena budget in bytes.
pub const DEFAULT_BUFFER_CAPACITY_BYTES: usize = 4 * 1024 * 1024;
/// Default per-advance wall-clock clamp: five 60 Hz frames.
pub const DEFAULT_MAX_UPDATE_SECONDS: f64 = 5.0 / 60.0;
/// Hardware cycle rate of the reference core.
pub const DEFAULT_TICKS_PER_SECOND: u64 = 4_194_304;
/// Default auto-rewind speed multiplier relative to real-time playback.
pub const DEFAULT_REWIND_FACTOR: f64 = 1.5;

/// Construction-time tunables for a [`crate::host::Host`] session.
///
/// `frames_per_base_state` is the central space/time trade-off of the rewind
/// buffer: a larger cadence stores more rewindable history per byte but makes
/// each seek replay up to that many frames of forward simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Every Nth completed frame captures a full snapshot; the frames in
    /// between append compact frame records.
    pub frames_per_base_state: u32,
    /// Byte budget for the rewind arena; oldest history is evicted beyond it.
    pub buffer_capacity_bytes: usize,
    /// Upper bound on wall-clock time consumed by one advance call.
    pub max_update_seconds: f64,
    /// Hardware clock rate used to convert seconds into ticks.
    pub ticks_per_second: u64,
    /// Auto-rewind speed relative to real time; above 1 rewinding outpaces
    /// normal playback.
    pub rewind_factor: f64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            frames_per_base_state: DEFAULT_FRAMES_PER_BASE_STATE,
            buffer_capacity_bytes: DEFAULT_BUFFER_CAPACITY_BYTES,
            max_update_seconds: DEFAULT_MAX_UPDATE_SECONDS,
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            rewind_factor: DEFAULT_REWIND_FACTOR,
        }
    }
}

/// Rejected construction attempt. The caller must not proceed with a
/// half-built session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    ZeroFramesPerBaseState,
    ZeroBufferCapacity,
    ZeroTicksPerSecond,
    NonPositiveMaxUpdate,
    NonPositiveRewindFactor,
    /// The arena cannot hold even one serialized snapshot.
    CapacityTooSmall { needed: usize, capacity: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroFramesPerBaseState => {
                write!(f, "frames_per_base_state must be at least 1")
            }
            ConfigError::ZeroBufferCapacity => write!(f, "buffer_capacity_bytes must be nonzero"),
            ConfigError::ZeroTicksPerSecond => write!(f, "ticks_per_second must be nonzero"),
            ConfigError::NonPositiveMaxUpdate => {
                write!(f, "max_update_seconds must be a positive finite number")
            }
            ConfigError::NonPositiveRewindFactor => {
                write!(f, "rewind_factor must be a positive finite number")
            }
            ConfigError::CapacityTooSmall { needed, capacity } => write!(
                f,
                "rewind buffer capacity ({capacity} bytes) cannot hold one snapshot ({needed} bytes)"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl HostConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_per_base_state == 0 {
            return Err(ConfigError::ZeroFramesPerBaseState);
        }
        if self.buffer_capacity_bytes == 0 {
            return Err(ConfigError::ZeroBufferCapacity);
        }
        if self.ticks_per_second == 0 {
            return Err(ConfigError::ZeroTicksPerSecond);
        }
        if !(self.max_update_seconds.is_finite() && self.max_update_seconds > 0.0) {
            return Err(ConfigError::NonPositiveMaxUpdate);
        }
        if !(self.rewind_factor.is_finite() && self.rewind_factor > 0.0) {
            return Err(ConfigError::NonPositiveRewindFactor);
        }
        Ok(())
    }

    /// Parse a config from TOML. Malformed input falls back to the defaults
    /// with a warning rather than aborting the session.
    pub fn from_toml(text: &str) -> Self {
        match toml::from_str(text) {
            Ok(config) => config,
            Err(err) => {
                warn!("malformed host config, using defaults: {err}");
                Self::default()
            }
        }
    }

    /// Serialize to TOML for persistence alongside other frontend settings.
    pub fn to_toml(&self) -> String {
        match toml::to_string_pretty(self) {
            Ok(text) => text,
            Err(err) => {
                warn!("failed to serialize host config: {err}");
                String::new()
            }
        }
    }
}

use crate::error::ConfigError;
use std::str::FromStr;
use std::time::Duration;

/// Maximum height of the frame handed to the segmentation model.
///
/// Only a fixed ladder of standard heights is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReducedHeight {
    H720,
    H540,
    H450,
    H360,
    H270,
    H180,
    H90,
    H9,
}

impl ReducedHeight {
    pub const ALL: [ReducedHeight; 8] = [
        Self::H720,
        Self::H540,
        Self::H450,
        Self::H360,
        Self::H270,
        Self::H180,
        Self::H90,
        Self::H9,
    ];

    pub fn pixels(self) -> u32 {
        match self {
            Self::H720 => 720,
            Self::H540 => 540,
            Self::H450 => 450,
            Self::H360 => 360,
            Self::H270 => 270,
            Self::H180 => 180,
            Self::H90 => 90,
            Self::H9 => 9,
        }
    }
}

impl Default for ReducedHeight {
    fn default() -> Self {
        Self::H450
    }
}

impl TryFrom<u32> for ReducedHeight {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|h| h.pixels() == value)
            .ok_or(ConfigError::ReducedHeight(value))
    }
}

impl FromStr for ReducedHeight {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s.trim().parse().map_err(|e| format!("{e}"))?;
        Self::try_from(value).map_err(|e| e.to_string())
    }
}

/// Library-side pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Whether the effect starts enabled.
    pub effect_on: bool,
    pub max_reduced_height: ReducedHeight,
    /// Emits a per-tick FPS line at debug level.
    pub debug: bool,
    /// Wall-clock budget of one tick (100ms = 10 fps).
    pub frame_budget: Duration,
    /// Watchdog for a single segmentation call.
    pub segmentation_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            effect_on: false,
            max_reduced_height: ReducedHeight::default(),
            debug: false,
            frame_budget: Duration::from_millis(100),
            segmentation_timeout: Duration::from_secs(2),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_budget.is_zero() {
            return Err(ConfigError::ZeroFrameBudget);
        }
        Ok(())
    }
}

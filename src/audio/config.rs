use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::{AnalysisError, Result};
use super::spectrum::WindowFunction;

/// Engine configuration, fixed for the lifetime of an engine instance.
///
/// Changing any value mid-stream requires a full reset (see
/// [`AnalysisScheduler::reconfigure`](super::AnalysisScheduler::reconfigure)).
/// Every field has a default, so a JSON file only needs the values it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Number of magnitude bins delivered by the spectrum source each tick.
    pub spectrum_size: usize,
    pub band_count: usize,
    /// Analysis cadence, independent of any render rate.
    pub tick_rate_hz: f32,
    /// Scalar applied to every raw band value.
    pub sensitivity: f32,

    // Beat detection
    pub beat_threshold: f32,
    pub beat_cooldown_seconds: f32,
    pub beat_history_capacity: usize,

    // Rolling energy statistics (~1 second of ticks)
    pub energy_history_capacity: usize,
    pub energy_source: EnergySource,

    // Tempo estimation
    pub min_bpm: f32,
    pub max_bpm: f32,
    /// Published tempo before the first successful estimate.
    pub default_bpm: f32,
    pub bpm_interval_capacity: usize,
    pub bpm_update_interval_seconds: f32,
    /// Blend factor toward each new median estimate (0 < blend <= 1).
    pub bpm_smoothing: f32,

    pub bin_weighting: BinWeighting,
    pub window: WindowFunction,
    pub smoothing: SmoothingConfig,
    pub execution: ExecutionMode,
    /// Events each subscriber may have queued before new ones are dropped.
    pub event_queue_capacity: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            spectrum_size: 1024,
            band_count: 8,
            tick_rate_hz: 60.0,
            sensitivity: 1.0,

            beat_threshold: 0.3,
            beat_cooldown_seconds: 0.1,
            beat_history_capacity: 16,

            energy_history_capacity: 60,
            energy_source: EnergySource::Raw,

            min_bpm: 60.0,
            max_bpm: 200.0,
            default_bpm: 120.0,
            bpm_interval_capacity: 8,
            bpm_update_interval_seconds: 2.0,
            bpm_smoothing: 0.1,

            bin_weighting: BinWeighting::IndexRamp,
            window: WindowFunction::BlackmanHarris,
            smoothing: SmoothingConfig::default(),
            execution: ExecutionMode::Worker,
            event_queue_capacity: 1024,
        }
    }
}

/// Which band values feed the rolling energy statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergySource {
    /// Sensitivity-scaled raw band values. Transient: a hit only raises the
    /// energy on the tick it lands.
    Raw,
    /// Smoothed, peak-normalized band levels. These hold high for the whole
    /// release of a hit.
    Normalized,
}

/// Per-bin weighting applied inside each band before averaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinWeighting {
    /// Multiply each magnitude by `global bin index + 1`.
    IndexRamp,
    /// Plain average of the band's magnitudes.
    Flat,
}

/// Attack/decay constants for the band smoother.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Decay step restored whenever a band is pushed up by a new value.
    pub base_decay: f32,
    /// Growth of the decay step on every tick the band falls.
    pub decay_acceleration: f32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            base_decay: 0.005,
            decay_acceleration: 1.2,
        }
    }
}

/// Where the per-tick computation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// On the scheduler task itself.
    Inline,
    /// On a blocking worker, joined before the next tick is dispatched.
    Worker,
}

impl AnalysisConfig {
    /// Checks every value the engine relies on. Called by every constructor.
    pub fn validate(&self) -> Result<()> {
        if self.spectrum_size == 0 {
            return Err(AnalysisError::config("spectrum_size must be greater than zero"));
        }
        if self.band_count == 0 {
            return Err(AnalysisError::config("band_count must be greater than zero"));
        }
        if !(self.tick_rate_hz.is_finite() && self.tick_rate_hz > 0.0) {
            return Err(AnalysisError::config(format!(
                "tick_rate_hz must be positive, got {}",
                self.tick_rate_hz
            )));
        }
        if !(self.sensitivity.is_finite() && self.sensitivity > 0.0) {
            return Err(AnalysisError::config(format!(
                "sensitivity must be positive, got {}",
                self.sensitivity
            )));
        }
        if !(self.beat_threshold.is_finite() && self.beat_threshold >= 0.0) {
            return Err(AnalysisError::config("beat_threshold must be a non-negative number"));
        }
        if !(self.beat_cooldown_seconds.is_finite() && self.beat_cooldown_seconds >= 0.0) {
            return Err(AnalysisError::config(
                "beat_cooldown_seconds must be a non-negative number",
            ));
        }
        if self.beat_history_capacity < 2 {
            return Err(AnalysisError::config("beat_history_capacity must hold at least two beats"));
        }
        if self.energy_history_capacity == 0 {
            return Err(AnalysisError::config(
                "energy_history_capacity must be greater than zero",
            ));
        }
        if !(self.min_bpm.is_finite() && self.min_bpm > 0.0) {
            return Err(AnalysisError::config("min_bpm must be positive"));
        }
        if !self.max_bpm.is_finite() || self.min_bpm >= self.max_bpm {
            return Err(AnalysisError::config(format!(
                "min_bpm ({}) must be below max_bpm ({})",
                self.min_bpm, self.max_bpm
            )));
        }
        if !(self.min_bpm..=self.max_bpm).contains(&self.default_bpm) {
            return Err(AnalysisError::config(format!(
                "default_bpm ({}) must lie within [{}, {}]",
                self.default_bpm, self.min_bpm, self.max_bpm
            )));
        }
        if self.bpm_interval_capacity < 2 {
            return Err(AnalysisError::config("bpm_interval_capacity must hold at least two intervals"));
        }
        if !(self.bpm_update_interval_seconds.is_finite() && self.bpm_update_interval_seconds > 0.0) {
            return Err(AnalysisError::config("bpm_update_interval_seconds must be positive"));
        }
        if !(self.bpm_smoothing > 0.0 && self.bpm_smoothing <= 1.0) {
            return Err(AnalysisError::config("bpm_smoothing must lie in (0, 1]"));
        }
        if !(self.smoothing.base_decay.is_finite() && self.smoothing.base_decay > 0.0) {
            return Err(AnalysisError::config("smoothing.base_decay must be positive"));
        }
        if !(self.smoothing.decay_acceleration.is_finite() && self.smoothing.decay_acceleration >= 1.0) {
            return Err(AnalysisError::config("smoothing.decay_acceleration must be at least 1.0"));
        }
        if self.event_queue_capacity == 0 {
            return Err(AnalysisError::config("event_queue_capacity must be greater than zero"));
        }
        Ok(())
    }

    /// Time between two analysis ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz as f64)
    }

    /// Load and validate a configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AnalysisConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_bands() {
        let config = AnalysisConfig {
            band_count: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_inverted_bpm_range() {
        let config = AnalysisConfig {
            min_bpm: 180.0,
            max_bpm: 180.0,
            default_bpm: 180.0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(format!("{err}").contains("min_bpm"));
    }

    #[test]
    fn rejects_default_bpm_outside_range() {
        let config = AnalysisConfig {
            default_bpm: 40.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_event_queue() {
        let config = AnalysisConfig {
            event_queue_capacity: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(format!("{err}").contains("event_queue_capacity"));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: AnalysisConfig =
            serde_json::from_str(r#"{ "band_count": 6, "energy_source": "normalized" }"#).unwrap();
        assert_eq!(config.band_count, 6);
        assert_eq!(config.energy_source, EnergySource::Normalized);
        assert_eq!(config.spectrum_size, 1024);
        assert_eq!(config.smoothing, SmoothingConfig::default());
    }

    #[test]
    fn tick_interval_matches_rate() {
        let config = AnalysisConfig {
            tick_rate_hz: 50.0,
            ..Default::default()
        };
        assert_eq!(config.tick_interval(), Duration::from_millis(20));
    }
}

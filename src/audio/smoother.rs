use serde::{Deserialize, Serialize};

use super::config::SmoothingConfig;

/// State of one analysis band.
///
/// `0 <= smoothed_value <= peak_ever_value` holds after every update, and
/// `peak_ever_value` never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    pub index: usize,
    pub raw_value: f32,
    pub smoothed_value: f32,
    pub decay_rate: f32,
    pub peak_ever_value: f32,
}

impl FrequencyBand {
    fn new(index: usize, base_decay: f32) -> Self {
        Self {
            index,
            raw_value: 0.0,
            smoothed_value: 0.0,
            decay_rate: base_decay,
            peak_ever_value: 0.0,
        }
    }

    /// Smoothed value relative to the loudest value this band has ever seen.
    pub fn normalized(&self) -> f32 {
        if self.peak_ever_value > 0.0 {
            self.smoothed_value / self.peak_ever_value
        } else {
            0.0
        }
    }
}

/// Fast-attack, accelerating-release smoothing per band, like a VU needle.
#[derive(Debug, Clone)]
pub struct BandSmoother {
    bands: Vec<FrequencyBand>,
    config: SmoothingConfig,
}

impl BandSmoother {
    pub fn new(band_count: usize, config: SmoothingConfig) -> Self {
        Self {
            bands: (0..band_count)
                .map(|index| FrequencyBand::new(index, config.base_decay))
                .collect(),
            config,
        }
    }

    /// Apply one tick of raw values. `raw.len()` must equal the band count;
    /// values are expected to be finite and non-negative.
    pub fn update(&mut self, raw: &[f32]) {
        debug_assert_eq!(raw.len(), self.bands.len());

        for (band, &value) in self.bands.iter_mut().zip(raw) {
            band.raw_value = value;

            if value > band.smoothed_value {
                band.smoothed_value = value;
                band.decay_rate = self.config.base_decay;
            } else {
                let was_above_floor = band.smoothed_value > 0.0;
                band.smoothed_value = (band.smoothed_value - band.decay_rate).max(0.0);
                // Growth stops at the floor so long silences cannot overflow the step.
                if was_above_floor {
                    band.decay_rate *= self.config.decay_acceleration;
                }
            }

            if value > band.peak_ever_value {
                band.peak_ever_value = value;
            }
        }
    }

    pub fn bands(&self) -> &[FrequencyBand] {
        &self.bands
    }

    pub fn normalized(&self, index: usize) -> Option<f32> {
        self.bands.get(index).map(FrequencyBand::normalized)
    }

    /// Write every band's normalized level into `out`.
    pub fn normalized_into(&self, out: &mut [f32]) {
        for (slot, band) in out.iter_mut().zip(&self.bands) {
            *slot = band.normalized();
        }
    }

    pub fn reset(&mut self) {
        let base_decay = self.config.base_decay;
        for band in &mut self.bands {
            *band = FrequencyBand::new(band.index, base_decay);
        }
    }
}

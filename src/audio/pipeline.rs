use serde::Serialize;

use super::band_mapper::FrequencyBandMapper;
use super::beat_detector::{BeatDetector, BeatEvent};
use super::config::AnalysisConfig;
use super::energy::{EnergyAnalyzer, EnergyState};
use super::error::{AnalysisError, Result};
use super::smoother::{BandSmoother, FrequencyBand};
use super::tempo::{BpmEstimate, BpmEstimator};

/// Everything one tick produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickOutput {
    pub tick: u64,
    pub timestamp: f64,
    pub raw_bands: Vec<f32>,
    /// Normalized band levels, 0.0 - 1.0.
    pub band_levels: Vec<f32>,
    pub beat_strength: f32,
    pub energy: EnergyState,
    /// Beat that fired on this tick.
    pub beat: Option<BeatEvent>,
    /// Most recent beat so far, from this tick or an earlier one.
    pub last_beat: Option<BeatEvent>,
    /// Set when the tempo refresh ran this tick and moved the published BPM.
    pub bpm_changed: Option<f32>,
    pub current_bpm: f32,
}

/// One complete analysis chain: bands, smoothing, energy, beats and tempo.
///
/// The pipeline is the unit of work the scheduler hands to its worker; it is
/// owned by exactly one task at a time, so none of its state needs locking.
#[derive(Debug, Clone)]
pub struct AnalysisPipeline {
    spectrum_size: usize,
    bpm_update_interval: f64,

    mapper: FrequencyBandMapper,
    smoother: BandSmoother,
    energy: EnergyAnalyzer,
    beats: BeatDetector,
    tempo: BpmEstimator,

    raw: Vec<f32>,
    levels: Vec<f32>,
    tick: u64,
    last_tempo_update: Option<f64>,
}

impl AnalysisPipeline {
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            spectrum_size: config.spectrum_size,
            bpm_update_interval: config.bpm_update_interval_seconds as f64,
            mapper: FrequencyBandMapper::new(
                config.band_count,
                config.sensitivity,
                config.bin_weighting,
            ),
            smoother: BandSmoother::new(config.band_count, config.smoothing),
            energy: EnergyAnalyzer::new(config.energy_history_capacity, config.energy_source),
            beats: BeatDetector::new(
                config.band_count,
                config.beat_threshold,
                config.beat_cooldown_seconds,
                config.beat_history_capacity,
            ),
            tempo: BpmEstimator::new(
                config.min_bpm,
                config.max_bpm,
                config.default_bpm,
                config.bpm_smoothing,
                config.bpm_interval_capacity,
            ),
            raw: vec![0.0; config.band_count],
            levels: vec![0.0; config.band_count],
            tick: 0,
            last_tempo_update: None,
        })
    }

    /// Run one tick over `spectrum`, captured at `timestamp` seconds.
    ///
    /// The input is checked before any state changes, so a rejected frame
    /// leaves the pipeline exactly as it was.
    pub fn process(&mut self, timestamp: f64, spectrum: &[f32]) -> Result<TickOutput> {
        if spectrum.len() != self.spectrum_size {
            return Err(AnalysisError::SpectrumLength {
                expected: self.spectrum_size,
                actual: spectrum.len(),
            });
        }
        if let Some((bin, &value)) = spectrum
            .iter()
            .enumerate()
            .find(|(_, v)| !(v.is_finite() && **v >= 0.0))
        {
            return Err(AnalysisError::NonFiniteSample { bin, value });
        }

        self.mapper.map(spectrum, &mut self.raw);
        if let Some(band) = self.raw.iter().position(|v| !v.is_finite()) {
            return Err(AnalysisError::BandOverflow { band });
        }

        self.smoother.update(&self.raw);
        self.smoother.normalized_into(&mut self.levels);

        let energy = self.energy.update(&self.raw, &self.levels);
        let beat_strength = self.beats.beat_strength(&self.levels);
        let beat = self.beats.detect(timestamp, beat_strength, &self.levels, &energy);
        let bpm_changed = self.refresh_tempo(timestamp);

        let output = TickOutput {
            tick: self.tick,
            timestamp,
            raw_bands: self.raw.clone(),
            band_levels: self.levels.clone(),
            beat_strength,
            energy,
            beat,
            last_beat: self.beats.last_beat(),
            bpm_changed,
            current_bpm: self.tempo.current_bpm(),
        };
        self.tick += 1;
        Ok(output)
    }

    fn refresh_tempo(&mut self, timestamp: f64) -> Option<f32> {
        match self.last_tempo_update {
            None => {
                self.last_tempo_update = Some(timestamp);
                None
            }
            Some(last) if timestamp - last >= self.bpm_update_interval => {
                self.last_tempo_update = Some(timestamp);
                self.tempo.update(self.beats.beat_history())
            }
            Some(_) => None,
        }
    }

    pub fn bands(&self) -> &[FrequencyBand] {
        self.smoother.bands()
    }

    pub fn energy_history(&self) -> impl Iterator<Item = f32> + '_ {
        self.energy.history()
    }

    pub fn bpm_estimate(&self) -> &BpmEstimate {
        self.tempo.estimate()
    }

    pub fn is_beat_active(&self, now: f64) -> bool {
        self.beats.is_beat_active(now)
    }

    pub fn ticks_processed(&self) -> u64 {
        self.tick
    }

    /// Back to the freshly-constructed state; configuration is kept.
    pub fn reset(&mut self) {
        self.smoother.reset();
        self.energy.reset();
        self.beats.reset();
        self.tempo.reset();
        self.raw.iter_mut().for_each(|v| *v = 0.0);
        self.levels.iter_mut().for_each(|v| *v = 0.0);
        self.tick = 0;
        self.last_tempo_update = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::config::EnergySource;

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            spectrum_size: 64,
            beat_threshold: 0.15,
            ..Default::default()
        }
    }

    fn kick_frame() -> Vec<f32> {
        let mut frame = vec![0.0; 64];
        frame[0] = 1.0;
        frame[1] = 1.0;
        frame
    }

    #[test]
    fn rejects_invalid_config() {
        let bad = AnalysisConfig {
            band_count: 0,
            ..config()
        };
        assert!(matches!(
            AnalysisPipeline::new(&bad),
            Err(AnalysisError::InvalidConfig(_))
        ));
    }

    #[test]
    fn silence_is_idle() {
        let mut pipeline = AnalysisPipeline::new(&config()).unwrap();
        let silence = vec![0.0; 64];
        for i in 0..120 {
            let out = pipeline.process(i as f64 / 60.0, &silence).unwrap();
            assert!(out.beat.is_none());
            assert_eq!(out.energy.instant_energy, 0.0);
            assert!(out.band_levels.iter().all(|&l| l == 0.0));
            assert_eq!(out.current_bpm, 120.0);
        }
    }

    #[test]
    fn rejected_frames_leave_state_untouched() {
        let mut pipeline = AnalysisPipeline::new(&config()).unwrap();
        pipeline.process(0.0, &vec![0.0; 64]).unwrap();

        let short = vec![0.0; 10];
        assert!(matches!(
            pipeline.process(0.1, &short),
            Err(AnalysisError::SpectrumLength { expected: 64, actual: 10 })
        ));

        let mut poisoned = kick_frame();
        poisoned[5] = f32::NAN;
        assert!(matches!(
            pipeline.process(0.2, &poisoned),
            Err(AnalysisError::NonFiniteSample { bin: 5, .. })
        ));

        let mut negative = kick_frame();
        negative[3] = -1.0;
        assert!(pipeline.process(0.3, &negative).is_err());

        assert_eq!(pipeline.ticks_processed(), 1);
        assert!(pipeline.bands().iter().all(|b| b.peak_ever_value == 0.0));
        assert_eq!(pipeline.energy_history().count(), 1);
    }

    #[test]
    fn kick_after_silence_fires() {
        let mut pipeline = AnalysisPipeline::new(&config()).unwrap();
        for i in 0..10 {
            pipeline.process(i as f64 / 60.0, &vec![0.0; 64]).unwrap();
        }
        let out = pipeline.process(10.0 / 60.0, &kick_frame()).unwrap();
        let beat = out.beat.expect("kick should fire");
        assert_eq!(beat.dominant_band_index, 0);
        assert!(pipeline.is_beat_active(out.timestamp));
        assert_eq!(out.last_beat, Some(beat));
        // bass average 0.5 -> 2 * 0.5 + 1 / 8
        assert!((out.beat_strength - 1.125).abs() < 1e-6);
        assert_eq!(beat.intensity, out.beat_strength);
    }

    #[test]
    fn overflowing_bands_are_rejected() {
        let mut pipeline = AnalysisPipeline::new(&config()).unwrap();
        pipeline.process(0.0, &kick_frame()).unwrap();

        // finite bins, but the weighted band sum does not fit in an f32
        let huge = vec![f32::MAX; 64];
        assert!(matches!(
            pipeline.process(0.1, &huge),
            Err(AnalysisError::BandOverflow { band: 0 })
        ));
        assert_eq!(pipeline.ticks_processed(), 1);
        assert_eq!(pipeline.energy_history().count(), 1);
        assert!(pipeline.bands().iter().all(|b| b.peak_ever_value.is_finite()));

        let out = pipeline.process(0.2, &vec![0.0; 64]).unwrap();
        assert!(out.raw_bands.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn band_invariants_hold_every_tick() {
        let mut pipeline = AnalysisPipeline::new(&AnalysisConfig {
            energy_source: EnergySource::Normalized,
            ..config()
        })
        .unwrap();

        for i in 0..300 {
            let mut frame = vec![0.0; 64];
            let phase = (i % 17) as f32 / 17.0;
            for (bin, value) in frame.iter_mut().enumerate() {
                *value = ((bin as f32 * 0.37 + phase * 6.0).sin().abs()) * (i % 5) as f32;
            }
            pipeline.process(i as f64 / 60.0, &frame).unwrap();

            for band in pipeline.bands() {
                assert!(band.smoothed_value >= 0.0);
                assert!(band.smoothed_value <= band.peak_ever_value);
            }
        }
    }

    #[test]
    fn tempo_refreshes_on_its_own_cadence() {
        let mut pipeline = AnalysisPipeline::new(&AnalysisConfig {
            default_bpm: 100.0,
            bpm_smoothing: 1.0,
            ..config()
        })
        .unwrap();

        let silence = vec![0.0; 64];
        let mut changes = Vec::new();
        for i in 0..(60 * 5) {
            let frame = if i % 30 == 15 { kick_frame() } else { silence.clone() };
            let out = pipeline.process(i as f64 / 60.0, &frame).unwrap();
            if let Some(bpm) = out.bpm_changed {
                changes.push((out.timestamp, bpm));
            }
        }

        // first refresh at t = 2s, one change, later refreshes agree
        assert_eq!(changes.len(), 1);
        assert!((changes[0].0 - 2.0).abs() < 1e-9);
        assert!((changes[0].1 - 120.0).abs() < 0.5);
        assert_eq!(pipeline.bpm_estimate().current_bpm, changes[0].1);
    }

    #[test]
    fn reset_returns_to_initial_state() {
        let mut pipeline = AnalysisPipeline::new(&config()).unwrap();
        pipeline.process(0.0, &kick_frame()).unwrap();
        pipeline.reset();
        assert_eq!(pipeline.ticks_processed(), 0);
        assert!(pipeline.bands().iter().all(|b| b.peak_ever_value == 0.0));
        assert_eq!(pipeline.energy_history().count(), 0);
        assert!(!pipeline.is_beat_active(0.0));
    }
}

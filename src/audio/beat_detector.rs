use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::Range;

use super::energy::{average, EnergyState};

/// Energy gate used for beats: looser than the one-sigma energy peak flag.
const BEAT_ENERGY_DEVIATIONS: f32 = 0.5;
const STRONG_BEAT_RATIO: f32 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeatKind {
    Kick,
    Snare,
    Generic,
}

/// A detected beat. Plain value; never changes after it is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    /// Stream time in seconds.
    pub timestamp: f64,
    /// Beat strength at the moment the beat fired.
    pub intensity: f32,
    pub dominant_band_index: usize,
    pub kind: BeatKind,
    pub is_strong_beat: bool,
    /// 0.0 - 1.0
    pub confidence: f32,
}

/// Bass / mid / treble split over `band_count` bands: the lowest two bands
/// are bass, the highest two treble, everything between is mid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandGroups {
    pub bass: Range<usize>,
    pub mid: Range<usize>,
    pub treble: Range<usize>,
}

impl BandGroups {
    pub fn for_band_count(band_count: usize) -> Self {
        let bass_end = band_count.min(2);
        let treble_start = band_count.saturating_sub(2).max(bass_end);
        Self {
            bass: 0..bass_end,
            mid: bass_end..treble_start,
            treble: treble_start..band_count,
        }
    }
}

/// Threshold + cooldown beat detector over normalized band levels.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    threshold: f32,
    cooldown: f64,
    groups: BandGroups,
    history: VecDeque<f64>,
    history_capacity: usize,
    last_beat: Option<BeatEvent>,
}

impl BeatDetector {
    pub fn new(band_count: usize, threshold: f32, cooldown_seconds: f32, history_capacity: usize) -> Self {
        Self {
            threshold,
            cooldown: cooldown_seconds as f64,
            groups: BandGroups::for_band_count(band_count),
            history: VecDeque::with_capacity(history_capacity),
            history_capacity,
            last_beat: None,
        }
    }

    /// `2 x bass average + overall average` of the normalized levels.
    pub fn beat_strength(&self, levels: &[f32]) -> f32 {
        2.0 * average(&levels[self.groups.bass.clone()]) + average(levels)
    }

    /// Evaluate one tick, given the tick's [`beat_strength`](Self::beat_strength).
    /// Returns the beat if one fired.
    pub fn detect(
        &mut self,
        timestamp: f64,
        strength: f32,
        levels: &[f32],
        energy: &EnergyState,
    ) -> Option<BeatEvent> {
        if strength <= self.threshold {
            return None;
        }
        if let Some(last) = self.last_beat {
            if timestamp - last.timestamp <= self.cooldown {
                return None;
            }
        }
        if !energy.exceeds(BEAT_ENERGY_DEVIATIONS) {
            return None;
        }

        let beat = BeatEvent {
            timestamp,
            intensity: strength,
            dominant_band_index: dominant_band(levels),
            kind: self.classify(levels),
            is_strong_beat: strength > STRONG_BEAT_RATIO * self.threshold,
            confidence: self.confidence(strength),
        };

        self.history.push_back(timestamp);
        if self.history.len() > self.history_capacity {
            self.history.pop_front();
        }
        self.last_beat = Some(beat);

        Some(beat)
    }

    fn classify(&self, levels: &[f32]) -> BeatKind {
        let bass = average(&levels[self.groups.bass.clone()]);
        let mid = average(&levels[self.groups.mid.clone()]);
        let treble = average(&levels[self.groups.treble.clone()]);

        if bass > mid && bass > treble {
            BeatKind::Kick
        } else if mid > bass && mid > treble {
            BeatKind::Snare
        } else {
            BeatKind::Generic
        }
    }

    fn confidence(&self, strength: f32) -> f32 {
        if self.threshold > 0.0 {
            (strength / (2.0 * self.threshold)).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }

    /// True for one cooldown window after the last beat.
    pub fn is_beat_active(&self, now: f64) -> bool {
        self.last_beat
            .map_or(false, |beat| now >= beat.timestamp && now - beat.timestamp <= self.cooldown)
    }

    pub fn last_beat(&self) -> Option<BeatEvent> {
        self.last_beat
    }

    /// Timestamps of recent beats, oldest first.
    pub fn beat_history(&self) -> impl Iterator<Item = f64> + '_ {
        self.history.iter().copied()
    }

    pub fn groups(&self) -> &BandGroups {
        &self.groups
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.last_beat = None;
    }
}

fn dominant_band(levels: &[f32]) -> usize {
    levels
        .iter()
        .enumerate()
        .fold((0, f32::MIN), |best, (i, &level)| if level > best.1 { (i, level) } else { best })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn energetic() -> EnergyState {
        EnergyState {
            instant_energy: 1.0,
            average_energy: 0.2,
            variance: 0.04,
            std_dev: 0.2,
            is_energy_peak: true,
            history_len: 30,
        }
    }

    fn detector(threshold: f32) -> BeatDetector {
        BeatDetector::new(8, threshold, 0.1, 4)
    }

    fn detect(
        detector: &mut BeatDetector,
        timestamp: f64,
        levels: &[f32],
        energy: &EnergyState,
    ) -> Option<BeatEvent> {
        let strength = detector.beat_strength(levels);
        detector.detect(timestamp, strength, levels, energy)
    }

    const KICK: [f32; 8] = [1.0, 1.0, 0.1, 0.1, 0.1, 0.1, 0.0, 0.0];

    #[test]
    fn band_groups() {
        let eight = BandGroups::for_band_count(8);
        assert_eq!((eight.bass, eight.mid, eight.treble), (0..2, 2..6, 6..8));

        let three = BandGroups::for_band_count(3);
        assert_eq!((three.bass, three.mid, three.treble), (0..2, 2..2, 2..3));

        let one = BandGroups::for_band_count(1);
        assert_eq!((one.bass, one.mid, one.treble), (0..1, 1..1, 1..1));
    }

    #[test]
    fn fires_and_classifies_kick() {
        let mut detector = detector(0.15);
        let beat = detect(&mut detector, 1.0, &KICK, &energetic()).expect("beat");
        assert_eq!(beat.kind, BeatKind::Kick);
        assert_eq!(beat.dominant_band_index, 0);
        assert!(beat.is_strong_beat);
        assert_eq!(beat.confidence, 1.0);
        // 2 * 1.0 + 2.4 / 8
        assert!((beat.intensity - 2.3).abs() < 1e-5);
        assert!(detector.is_beat_active(1.05));
        assert!(!detector.is_beat_active(1.2));
    }

    #[test]
    fn cooldown_suppresses_retrigger() {
        let mut detector = detector(0.15);
        assert!(detect(&mut detector, 1.0, &KICK, &energetic()).is_some());
        assert!(detect(&mut detector, 1.05, &KICK, &energetic()).is_none());
        assert!(detect(&mut detector, 1.1, &KICK, &energetic()).is_none());
        assert!(detect(&mut detector, 1.15, &KICK, &energetic()).is_some());
    }

    #[test]
    fn energy_gate_blocks_flat_energy() {
        let mut detector = detector(0.15);
        let flat = EnergyState {
            instant_energy: 0.3,
            average_energy: 0.3,
            history_len: 30,
            ..Default::default()
        };
        assert!(detect(&mut detector, 1.0, &KICK, &flat).is_none());
    }

    #[test]
    fn threshold_blocks_weak_signal() {
        let mut detector = detector(5.0);
        assert!(detect(&mut detector, 1.0, &KICK, &energetic()).is_none());
        assert!(detector.last_beat().is_none());
    }

    #[test]
    fn mid_heavy_levels_are_snares() {
        let mut detector = detector(0.15);
        let levels = [0.0, 0.0, 0.2, 1.0, 1.0, 0.2, 0.0, 0.0];
        let beat = detect(&mut detector, 2.0, &levels, &energetic()).expect("beat");
        assert_eq!(beat.kind, BeatKind::Snare);
        assert_eq!(beat.dominant_band_index, 3);
        // no bass, so strength is the plain average: 2.4 / 8
        assert!(beat.is_strong_beat);
    }

    #[test]
    fn balanced_levels_are_generic() {
        let mut detector = detector(0.15);
        let beat = detect(&mut detector, 0.5, &[0.5; 8], &energetic()).expect("beat");
        assert_eq!(beat.kind, BeatKind::Generic);
        assert!((beat.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn confidence_scales_with_threshold() {
        let mut detector = detector(1.0);
        let beat = detect(&mut detector, 0.5, &[0.5; 8], &energetic()).expect("beat");
        // strength 1.5 against 2 x threshold
        assert!((beat.confidence - 0.75).abs() < 1e-6);
        assert!(!beat.is_strong_beat);
    }

    #[test]
    fn history_is_bounded() {
        let mut detector = detector(0.15);
        for i in 0..10 {
            detect(&mut detector, i as f64, &KICK, &energetic());
        }
        let history: Vec<f64> = detector.beat_history().collect();
        assert_eq!(history, vec![6.0, 7.0, 8.0, 9.0]);
    }
}

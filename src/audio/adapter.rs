use serde::Serialize;

use super::energy::average;
use super::events::AnalysisSnapshot;

/// Where each named range starts and ends, as a fraction of the band count.
/// On the default 8-band layout this gives sub-bass = band 0, bass = 1-2,
/// mid = 3-5, treble = 6 and presence = 7.
const RANGE_EDGES: [f32; 6] = [0.0, 0.125, 0.375, 0.75, 0.875, 1.0];

/// Five-range view of the band levels for visual consumers.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct FrequencyBands {
    pub sub_bass: f32,
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
    pub presence: f32,
}

impl FrequencyBands {
    /// Average the normalized band levels over each named range. With fewer
    /// than five bands some ranges share a band.
    pub fn from_levels(levels: &[f32]) -> Self {
        if levels.is_empty() {
            return Self::default();
        }

        let count = levels.len();
        let range = |group: usize| {
            let edge = |fraction: f32| (fraction * count as f32).round() as usize;
            let start = edge(RANGE_EDGES[group]).min(count - 1);
            let end = edge(RANGE_EDGES[group + 1]).clamp(start + 1, count);
            average(&levels[start..end])
        };

        Self {
            sub_bass: range(0),
            bass: range(1),
            mid: range(2),
            treble: range(3),
            presence: range(4),
        }
    }

    pub fn overall(&self) -> f32 {
        (self.sub_bass + self.bass + self.mid + self.treble + self.presence) / 5.0
    }
}

impl From<&AnalysisSnapshot> for FrequencyBands {
    fn from(snapshot: &AnalysisSnapshot) -> Self {
        Self::from_levels(&snapshot.band_levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eight_band_layout() {
        let levels = [0.1, 0.2, 0.4, 0.3, 0.3, 0.3, 0.7, 0.9];
        let bands = FrequencyBands::from_levels(&levels);
        assert!((bands.sub_bass - 0.1).abs() < 1e-6);
        assert!((bands.bass - 0.3).abs() < 1e-6);
        assert!((bands.mid - 0.3).abs() < 1e-6);
        assert!((bands.treble - 0.7).abs() < 1e-6);
        assert!((bands.presence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn few_bands_share_ranges() {
        let bands = FrequencyBands::from_levels(&[1.0, 0.0]);
        assert_eq!(bands.sub_bass, 1.0);
        assert_eq!(bands.presence, 0.0);

        let single = FrequencyBands::from_levels(&[0.5]);
        assert_eq!(single.overall(), 0.5);
    }

    #[test]
    fn empty_levels_are_silent() {
        assert_eq!(FrequencyBands::from_levels(&[]), FrequencyBands::default());
    }
}

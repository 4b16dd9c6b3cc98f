use super::config::BinWeighting;

/// Splits a magnitude spectrum into logarithmically widening bands.
///
/// Band `i` consumes `2^(i + 1)` consecutive bins, and the last band takes
/// two extra bins on top of that. With 8 bands this walks exactly the first
/// 512 bins. A spectrum shorter than the layout simply runs out: the band
/// that crosses the end averages over the bins it got, later bands are zero.
#[derive(Debug, Clone)]
pub struct FrequencyBandMapper {
    band_count: usize,
    sensitivity: f32,
    weighting: BinWeighting,
}

impl FrequencyBandMapper {
    pub fn new(band_count: usize, sensitivity: f32, weighting: BinWeighting) -> Self {
        Self {
            band_count,
            sensitivity,
            weighting,
        }
    }

    pub fn band_count(&self) -> usize {
        self.band_count
    }

    /// Number of bins band `index` asks for.
    pub fn band_width(&self, index: usize) -> usize {
        let width = 2usize
            .checked_pow(index as u32)
            .map_or(usize::MAX, |w| w.saturating_mul(2));
        if index + 1 == self.band_count {
            width.saturating_add(2)
        } else {
            width
        }
    }

    /// Total bins the full layout would consume.
    pub fn bins_required(&self) -> usize {
        (0..self.band_count).fold(0usize, |acc, i| acc.saturating_add(self.band_width(i)))
    }

    /// Write one raw value per band into `out` (`out.len()` must equal the
    /// band count).
    pub fn map(&self, spectrum: &[f32], out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.band_count);

        let mut cursor = 0usize;
        for (index, value) in out.iter_mut().enumerate() {
            let start = cursor.min(spectrum.len());
            let end = cursor.saturating_add(self.band_width(index)).min(spectrum.len());
            cursor = end;

            let sum: f32 = spectrum[start..end]
                .iter()
                .enumerate()
                .map(|(offset, &magnitude)| match self.weighting {
                    BinWeighting::IndexRamp => magnitude * (start + offset + 1) as f32,
                    BinWeighting::Flat => magnitude,
                })
                .sum();

            let consumed = (end - start).max(1);
            *value = sum / consumed as f32 * self.sensitivity;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper(bands: usize) -> FrequencyBandMapper {
        FrequencyBandMapper::new(bands, 1.0, BinWeighting::IndexRamp)
    }

    #[test]
    fn eight_bands_walk_512_bins() {
        let mapper = mapper(8);
        let widths: Vec<usize> = (0..8).map(|i| mapper.band_width(i)).collect();
        assert_eq!(widths, vec![2, 4, 8, 16, 32, 64, 128, 258]);
        assert_eq!(mapper.bins_required(), 512);
    }

    #[test]
    fn weights_each_bin_by_its_position() {
        let mapper = mapper(2);
        let spectrum = [1.0; 8];
        let mut out = [0.0; 2];
        mapper.map(&spectrum, &mut out);

        // band 0: bins 0..2 -> (1 + 2) / 2
        assert!((out[0] - 1.5).abs() < 1e-6);
        // band 1: bins 2..8 (4 + 2 extra) -> (3 + 4 + 5 + 6 + 7 + 8) / 6
        assert!((out[1] - 5.5).abs() < 1e-6);
    }

    #[test]
    fn flat_weighting_is_a_plain_average() {
        let mapper = FrequencyBandMapper::new(2, 2.0, BinWeighting::Flat);
        let spectrum = [0.5; 8];
        let mut out = [0.0; 2];
        mapper.map(&spectrum, &mut out);
        assert!((out[0] - 1.0).abs() < 1e-6);
        assert!((out[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn short_spectrum_truncates_and_zeroes_later_bands() {
        let mapper = mapper(4);
        // bands want 2 + 4 + 8 + 18 bins; only 5 are present
        let spectrum = [1.0; 5];
        let mut out = [9.0; 4];
        mapper.map(&spectrum, &mut out);

        assert!((out[0] - 1.5).abs() < 1e-6);
        // band 1 gets bins 2..5 -> (3 + 4 + 5) / 3
        assert!((out[1] - 4.0).abs() < 1e-6);
        assert_eq!(out[2], 0.0);
        assert_eq!(out[3], 0.0);
    }

    #[test]
    fn empty_spectrum_is_silent() {
        let mapper = mapper(8);
        let mut out = [1.0; 8];
        mapper.map(&[], &mut out);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn huge_band_counts_do_not_overflow() {
        let mapper = mapper(80);
        assert_eq!(mapper.band_width(70), usize::MAX);
        assert_eq!(mapper.bins_required(), usize::MAX);

        let spectrum = [1.0; 16];
        let mut out = vec![0.0; 80];
        mapper.map(&spectrum, &mut out);
        assert!(out.iter().all(|v| v.is_finite()));
    }
}

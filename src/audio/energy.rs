use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::config::EnergySource;

/// Energy statistics for one tick. The rolling history itself stays inside
/// the [`EnergyAnalyzer`]; this is the copy handed to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EnergyState {
    pub instant_energy: f32,
    pub average_energy: f32,
    /// Population variance over the history.
    pub variance: f32,
    pub std_dev: f32,
    /// `instant_energy > average_energy + std_dev`.
    pub is_energy_peak: bool,
    pub history_len: usize,
}

impl EnergyState {
    /// Whether the instant energy exceeds the rolling mean by more than
    /// `deviations` standard deviations. Always false with under two samples.
    pub fn exceeds(&self, deviations: f32) -> bool {
        self.history_len >= 2 && self.instant_energy > self.average_energy + deviations * self.std_dev
    }
}

/// Rolling mean/variance of per-tick band energy over a bounded window.
#[derive(Debug, Clone)]
pub struct EnergyAnalyzer {
    source: EnergySource,
    capacity: usize,
    history: VecDeque<f32>,
    state: EnergyState,
}

impl EnergyAnalyzer {
    pub fn new(capacity: usize, source: EnergySource) -> Self {
        Self {
            source,
            capacity,
            history: VecDeque::with_capacity(capacity),
            state: EnergyState::default(),
        }
    }

    /// Push this tick's energy and recompute the statistics over the window.
    pub fn update(&mut self, raw: &[f32], normalized: &[f32]) -> EnergyState {
        let values = match self.source {
            EnergySource::Raw => raw,
            EnergySource::Normalized => normalized,
        };
        let instant_energy = average(values);

        self.history.push_back(instant_energy);
        if self.history.len() > self.capacity {
            self.history.pop_front();
        }

        let len = self.history.len();
        let average_energy = self.history.iter().sum::<f32>() / len as f32;
        let variance = if len < 2 {
            0.0
        } else {
            self.history
                .iter()
                .map(|&e| (e - average_energy).powi(2))
                .sum::<f32>()
                / len as f32
        };
        let std_dev = variance.sqrt();

        let mut state = EnergyState {
            instant_energy,
            average_energy,
            variance,
            std_dev,
            is_energy_peak: false,
            history_len: len,
        };
        state.is_energy_peak = state.exceeds(1.0);

        self.state = state;
        state
    }

    pub fn state(&self) -> EnergyState {
        self.state
    }

    pub fn history(&self) -> impl Iterator<Item = f32> + '_ {
        self.history.iter().copied()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.state = EnergyState::default();
    }
}

/// Mean of `values`, zero for an empty slice.
pub(crate) fn average(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

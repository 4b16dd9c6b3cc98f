use crossbeam_channel::{Receiver, Sender, TryRecvError};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

use super::error::{AnalysisError, Result};

/// Supplies one fixed-length magnitude spectrum per analysis tick.
///
/// Implementations must not block: the scheduler calls this on its timer
/// task, so a backend that cannot deliver fresh data should return the last
/// cached spectrum (or silence) instead of waiting.
pub trait SpectrumSource: Send {
    /// Fill `frame` with non-negative magnitudes. `frame.len()` is the
    /// engine's configured spectrum size. Silence is an all-zero frame.
    fn read_spectrum(&mut self, window: WindowFunction, frame: &mut [f32]) -> Result<()>;
}

impl<S: SpectrumSource + ?Sized> SpectrumSource for Box<S> {
    fn read_spectrum(&mut self, window: WindowFunction, frame: &mut [f32]) -> Result<()> {
        (**self).read_spectrum(window, frame)
    }
}

/// Analysis window applied to the time-domain block before the FFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowFunction {
    Rectangular,
    Triangle,
    Hamming,
    Hann,
    Blackman,
    BlackmanHarris,
}

impl WindowFunction {
    pub fn coefficients(self, size: usize) -> Vec<f32> {
        if size <= 1 {
            return vec![1.0; size];
        }

        let span = (size - 1) as f32;
        (0..size)
            .map(|i| {
                let phase = 2.0 * PI * i as f32 / span;
                match self {
                    WindowFunction::Rectangular => 1.0,
                    WindowFunction::Triangle => 1.0 - ((i as f32 - span / 2.0) / (span / 2.0)).abs(),
                    WindowFunction::Hamming => 0.54 - 0.46 * phase.cos(),
                    WindowFunction::Hann => 0.5 * (1.0 - phase.cos()),
                    WindowFunction::Blackman => {
                        0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
                    }
                    WindowFunction::BlackmanHarris => {
                        0.35875 - 0.48829 * phase.cos() + 0.14128 * (2.0 * phase).cos()
                            - 0.01168 * (3.0 * phase).cos()
                    }
                }
            })
            .collect()
    }
}

/// Producer side of an [`FftSpectrumSource`]. Cloneable and safe to move into
/// an audio callback; pushing never blocks.
#[derive(Clone)]
pub struct SampleFeed {
    sender: Sender<Vec<f32>>,
}

impl SampleFeed {
    /// Queue a block of mono samples. Returns `false` once the source is gone.
    pub fn push(&self, samples: Vec<f32>) -> bool {
        self.sender.send(samples).is_ok()
    }
}

/// Spectrum source that turns pushed time-domain samples into windowed FFT
/// magnitudes.
///
/// The FFT runs over `2 * spectrum_size` samples and the first
/// `spectrum_size` bins are reported, scaled by `2 / fft_size`. Samples are
/// taken from the most recent window; older samples are discarded.
pub struct FftSpectrumSource {
    spectrum_size: usize,
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    receiver: Receiver<Vec<f32>>,
    feed: SampleFeed,

    samples: VecDeque<f32>,
    window_kind: Option<WindowFunction>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl FftSpectrumSource {
    pub fn new(spectrum_size: usize) -> Result<Self> {
        if spectrum_size == 0 {
            return Err(AnalysisError::config("spectrum_size must be greater than zero"));
        }

        let fft_size = spectrum_size * 2;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        let (sender, receiver) = crossbeam_channel::unbounded();

        Ok(Self {
            spectrum_size,
            fft_size,
            fft,
            receiver,
            feed: SampleFeed { sender },
            samples: VecDeque::from(vec![0.0; fft_size]),
            window_kind: None,
            window: Vec::new(),
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch,
        })
    }

    /// A handle for pushing samples from another thread.
    pub fn feed(&self) -> SampleFeed {
        self.feed.clone()
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Append samples directly, bypassing the feed channel.
    pub fn push_samples(&mut self, samples: &[f32]) {
        for &sample in samples {
            if self.samples.len() == self.fft_size {
                self.samples.pop_front();
            }
            self.samples.push_back(sample);
        }
    }

    fn drain_feed(&mut self) {
        loop {
            match self.receiver.try_recv() {
                Ok(block) => self.push_samples(&block),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn prepare_window(&mut self, window: WindowFunction) {
        if self.window_kind != Some(window) {
            self.window = window.coefficients(self.fft_size);
            self.window_kind = Some(window);
        }
    }
}

impl SpectrumSource for FftSpectrumSource {
    fn read_spectrum(&mut self, window: WindowFunction, frame: &mut [f32]) -> Result<()> {
        if frame.len() != self.spectrum_size {
            return Err(AnalysisError::SpectrumLength {
                expected: self.spectrum_size,
                actual: frame.len(),
            });
        }

        self.drain_feed();
        self.prepare_window(window);

        for ((slot, &sample), &coefficient) in self
            .buffer
            .iter_mut()
            .zip(self.samples.iter())
            .zip(self.window.iter())
        {
            *slot = Complex::new(sample * coefficient, 0.0);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let scale = 2.0 / self.fft_size as f32;
        for (out, bin) in frame.iter_mut().zip(self.buffer.iter()) {
            *out = bin.norm() * scale;
        }
        Ok(())
    }
}

pub mod adapter;
pub mod band_mapper;
pub mod beat_detector;
#[cfg(feature = "capture")]
pub mod capture;
pub mod config;
pub mod energy;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod scheduler;
pub mod smoother;
pub mod spectrum;
pub mod tempo;

pub use adapter::FrequencyBands;
pub use band_mapper::FrequencyBandMapper;
pub use beat_detector::{BandGroups, BeatDetector, BeatEvent, BeatKind};
#[cfg(feature = "capture")]
pub use capture::LiveCapture;
pub use config::{AnalysisConfig, BinWeighting, EnergySource, ExecutionMode, SmoothingConfig};
pub use energy::{EnergyAnalyzer, EnergyState};
pub use error::{AnalysisError, Result};
pub use events::{AnalysisEvent, AnalysisHandle, AnalysisSnapshot};
pub use pipeline::{AnalysisPipeline, TickOutput};
pub use scheduler::{AnalysisScheduler, RunningEngine};
pub use smoother::{BandSmoother, FrequencyBand};
pub use spectrum::{FftSpectrumSource, SampleFeed, SpectrumSource, WindowFunction};
pub use tempo::{BpmEstimate, BpmEstimator};

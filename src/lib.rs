//! Real-time spectral analysis and beat detection.
//!
//! A [`SpectrumSource`](audio::SpectrumSource) supplies one magnitude spectrum
//! per tick. The [`AnalysisScheduler`](audio::AnalysisScheduler) runs it
//! through band mapping, smoothing, energy statistics, beat detection and
//! tempo estimation, then publishes the results through an
//! [`AnalysisHandle`](audio::AnalysisHandle) and an event channel.
//!
//! ```rust,no_run
//! use flowbeat::audio::{AnalysisConfig, AnalysisEvent, AnalysisScheduler, FftSpectrumSource};
//!
//! # async fn example() -> flowbeat::audio::Result<()> {
//! let config = AnalysisConfig::default();
//! let source = FftSpectrumSource::new(config.spectrum_size)?;
//! let feed = source.feed();
//!
//! let engine = AnalysisScheduler::spawn(config, source)?;
//! let events = engine.subscribe()?;
//!
//! feed.push(vec![0.0; 2048]);
//! if let Ok(AnalysisEvent::BeatDetected(beat)) = events.recv() {
//!     println!("beat at {:.2}s", beat.timestamp);
//! }
//! engine.shutdown().await
//! # }
//! ```

pub mod audio;

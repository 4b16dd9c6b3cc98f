/// Result alias carrying [`AnalysisError`].
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors surfaced by the analysis engine.
///
/// Silence, a missing beat or too little history for a tempo estimate are not
/// errors; they are the engine's normal idle states.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Rejected at construction so the engine never starts inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("band index {index} out of range (band count {band_count})")]
    BandOutOfRange { index: usize, band_count: usize },

    #[error("spectrum has {actual} bins, engine expects {expected}")]
    SpectrumLength { expected: usize, actual: usize },

    #[error("spectrum bin {bin} is not a finite non-negative magnitude ({value})")]
    NonFiniteSample { bin: usize, value: f32 },

    #[error("band {band} overflowed while mapping the spectrum")]
    BandOverflow { band: usize },

    /// The spectrum source could not deliver a frame this tick.
    #[error("spectrum source failed: {0}")]
    Source(String),

    #[error("analysis worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("published analysis state has been poisoned")]
    Poisoned,

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl AnalysisError {
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn source_failed<T: Into<String>>(msg: T) -> Self {
        Self::Source(msg.into())
    }
}

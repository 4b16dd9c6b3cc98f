use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use flowbeat::audio::{
    AnalysisConfig, AnalysisEvent, AnalysisHandle, AnalysisScheduler, BeatEvent, BeatKind,
    ExecutionMode, FftSpectrumSource, FrequencyBands,
};

#[derive(Parser)]
#[command(name = "flowbeat-analyze")]
#[command(about = "Offline beat analysis - runs the real-time engine over a WAV file and writes a JSON report")]
struct Args {
    /// WAV file to analyze
    wav_file: PathBuf,

    /// Output JSON file path
    #[arg(long, short, default_value = "flowbeat_report.json")]
    output: PathBuf,

    /// Engine configuration (JSON); unspecified values use defaults
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the analysis tick rate in Hz
    #[arg(long)]
    tick_rate: Option<f32>,

    /// Override the beat threshold
    #[arg(long)]
    threshold: Option<f32>,

    /// Run every tick on the scheduler task instead of a worker
    #[arg(long)]
    inline: bool,

    /// Include per-tick data (large files, useful for tuning thresholds)
    #[arg(long)]
    frame_by_frame: bool,
}

#[derive(Debug, Serialize)]
struct FeatureStats {
    min: f32,
    max: f32,
    mean: f32,
    median: f32,
    std_dev: f32,
    samples: usize,
}

#[derive(Debug, Serialize)]
struct FileInfo {
    filename: String,
    duration_seconds: f64,
    sample_rate: u32,
    channels: u16,
    total_samples: usize,
    total_ticks: u64,
}

#[derive(Debug, Default, Serialize)]
struct BeatStats {
    total_beats: usize,
    kicks: usize,
    snares: usize,
    generic: usize,
    strong_beats: usize,
    average_interval: f64,
    /// 0-1, how regular beat timing is
    beat_consistency: f64,
    strongest_beat: f32,
    weakest_beat: f32,
}

#[derive(Debug, Serialize)]
struct TempoChange {
    timestamp: f64,
    bpm: f32,
}

#[derive(Debug, Serialize)]
struct FrameRecord {
    tick: u64,
    timestamp: f64,
    bands: FrequencyBands,
    band_levels: Vec<f32>,
    beat_strength: f32,
    instant_energy: f32,
    beat_active: bool,
    current_bpm: f32,
}

#[derive(Debug, Serialize)]
struct AnalysisReport {
    file_info: FileInfo,
    config: AnalysisConfig,
    feature_stats: BTreeMap<String, FeatureStats>,
    beat_stats: BeatStats,
    final_bpm: f32,
    failed_ticks: u64,
    beat_events: Vec<BeatEvent>,
    tempo_changes: Vec<TempoChange>,
    frame_data: Option<Vec<FrameRecord>>,
}

struct Wav {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

/// Load a WAV file and mix it down to mono.
fn load_wav(path: &Path) -> Result<Wav> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_value = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_value))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    let channels = spec.channels.max(1);
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels as usize)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(Wav {
        samples,
        sample_rate: spec.sample_rate,
        channels,
    })
}

/// Gathers everything the report needs while the engine runs.
#[derive(Default)]
struct Collector {
    features: BTreeMap<String, Vec<f32>>,
    beats: Vec<BeatEvent>,
    tempo_changes: Vec<TempoChange>,
    frames: Vec<FrameRecord>,
    last_tick_seen: u64,
}

impl Collector {
    fn add_sample(&mut self, feature: &str, value: f32) {
        self.features.entry(feature.to_string()).or_default().push(value);
    }

    fn drain_events(&mut self, events: &crossbeam_channel::Receiver<AnalysisEvent>) {
        for event in events.try_iter() {
            match event {
                AnalysisEvent::EnergyUpdate { energy, .. } => {
                    self.add_sample("instant_energy", energy.instant_energy);
                }
                AnalysisEvent::BeatDetected(beat) => self.beats.push(beat),
                AnalysisEvent::BpmChanged { timestamp, bpm } => {
                    self.tempo_changes.push(TempoChange { timestamp, bpm });
                }
            }
        }
    }

    /// Record the published snapshot if a new tick landed since last time.
    fn observe(&mut self, handle: &AnalysisHandle, keep_frames: bool) -> Result<()> {
        let snapshot = handle.snapshot()?;
        if snapshot.ticks == self.last_tick_seen {
            return Ok(());
        }
        self.last_tick_seen = snapshot.ticks;

        let bands = FrequencyBands::from(&*snapshot);
        self.add_sample("sub_bass", bands.sub_bass);
        self.add_sample("bass", bands.bass);
        self.add_sample("mid", bands.mid);
        self.add_sample("treble", bands.treble);
        self.add_sample("presence", bands.presence);
        self.add_sample("beat_strength", snapshot.beat_strength);

        if keep_frames {
            self.frames.push(FrameRecord {
                tick: snapshot.ticks - 1,
                timestamp: snapshot.timestamp,
                bands,
                band_levels: snapshot.band_levels.clone(),
                beat_strength: snapshot.beat_strength,
                instant_energy: snapshot.energy.instant_energy,
                beat_active: snapshot.is_beat_active(),
                current_bpm: snapshot.current_bpm,
            });
        }
        Ok(())
    }
}

fn calculate_stats(data: &[f32]) -> FeatureStats {
    if data.is_empty() {
        return FeatureStats {
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            median: 0.0,
            std_dev: 0.0,
            samples: 0,
        };
    }

    let mut sorted = data.to_vec();
    sorted.sort_by(f32::total_cmp);

    let mean = data.iter().sum::<f32>() / data.len() as f32;
    let variance = data.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / data.len() as f32;

    FeatureStats {
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean,
        median: sorted[sorted.len() / 2],
        std_dev: variance.sqrt(),
        samples: data.len(),
    }
}

fn calculate_beat_stats(beats: &[BeatEvent]) -> BeatStats {
    if beats.is_empty() {
        return BeatStats::default();
    }

    let intervals: Vec<f64> = beats
        .windows(2)
        .map(|pair| pair[1].timestamp - pair[0].timestamp)
        .collect();

    let (average_interval, beat_consistency) = if intervals.len() > 1 {
        let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
        let variance =
            intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>() / intervals.len() as f64;
        (mean, 1.0 / (1.0 + variance))
    } else {
        (intervals.first().copied().unwrap_or(0.0), 0.0)
    };

    let count = |kind: BeatKind| beats.iter().filter(|b| b.kind == kind).count();

    BeatStats {
        total_beats: beats.len(),
        kicks: count(BeatKind::Kick),
        snares: count(BeatKind::Snare),
        generic: count(BeatKind::Generic),
        strong_beats: beats.iter().filter(|b| b.is_strong_beat).count(),
        average_interval,
        beat_consistency,
        strongest_beat: beats.iter().fold(0.0f32, |a, b| a.max(b.intensity)),
        weakest_beat: beats.iter().fold(f32::INFINITY, |a, b| a.min(b.intensity)),
    }
}

fn build_config(args: &Args) -> Result<AnalysisConfig> {
    let mut config = match &args.config {
        Some(path) => AnalysisConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AnalysisConfig::default(),
    };

    if let Some(rate) = args.tick_rate {
        config.tick_rate_hz = rate;
        // keep roughly one second of energy history
        config.energy_history_capacity = rate.round().max(1.0) as usize;
    }
    if let Some(threshold) = args.threshold {
        config.beat_threshold = threshold;
    }
    if args.inline {
        config.execution = ExecutionMode::Inline;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("Starting offline beat analysis");
    info!("File: {}", args.wav_file.display());
    info!("Output: {}", args.output.display());
    info!("Frame-by-frame logging: {}", args.frame_by_frame);

    let config = build_config(&args)?;
    let wav = load_wav(&args.wav_file)?;
    if wav.sample_rate == 0 {
        bail!("{} reports a sample rate of 0", args.wav_file.display());
    }

    let total_samples = wav.samples.len();
    let duration = total_samples as f64 / wav.sample_rate as f64;
    let tick_rate = config.tick_rate_hz as f64;
    let total_ticks = (duration * tick_rate).floor() as u64;
    info!(
        "Processing {} samples ({:.2}s) as {} ticks at {} Hz",
        total_samples, duration, total_ticks, config.tick_rate_hz
    );

    let source = FftSpectrumSource::new(config.spectrum_size)?;
    let feed = source.feed();
    let mut scheduler = AnalysisScheduler::new(config.clone(), source)?;
    let handle = scheduler.handle();
    let events = scheduler.subscribe()?;

    let mut collector = Collector::default();
    let mut position = 0;
    for tick in 0..total_ticks {
        let end = (((tick + 1) as f64 / tick_rate) * wav.sample_rate as f64).round() as usize;
        let end = end.min(total_samples);
        feed.push(wav.samples[position..end].to_vec());
        position = end;

        scheduler.tick(tick as f64 / tick_rate).await?;
        collector.drain_events(&events);
        collector.observe(&handle, args.frame_by_frame)?;

        if tick > 0 && tick % 1000 == 0 {
            info!("Processed {} ticks ({:.1}s of {:.1}s)", tick, tick as f64 / tick_rate, duration);
        }
    }
    scheduler.flush().await?;
    collector.drain_events(&events);
    collector.observe(&handle, args.frame_by_frame)?;

    let failed_ticks = scheduler.failed_ticks();
    let final_bpm = handle.current_bpm()?;
    info!(
        "Analysis complete: {} beats, final tempo {:.1} BPM, {} failed ticks",
        collector.beats.len(),
        final_bpm,
        failed_ticks
    );

    let report = AnalysisReport {
        file_info: FileInfo {
            filename: args.wav_file.display().to_string(),
            duration_seconds: duration,
            sample_rate: wav.sample_rate,
            channels: wav.channels,
            total_samples,
            total_ticks,
        },
        config,
        feature_stats: collector
            .features
            .iter()
            .map(|(name, data)| (name.clone(), calculate_stats(data)))
            .collect(),
        beat_stats: calculate_beat_stats(&collector.beats),
        final_bpm,
        failed_ticks,
        beat_events: collector.beats,
        tempo_changes: collector.tempo_changes,
        frame_data: args.frame_by_frame.then_some(collector.frames),
    };

    let json = serde_json::to_string_pretty(&report)?;
    let mut file = File::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;
    file.write_all(json.as_bytes())?;

    info!("Report written to {}", args.output.display());
    Ok(())
}

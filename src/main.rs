use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::time::Duration;

use flowbeat::audio::{
    AnalysisConfig, AnalysisEvent, AnalysisScheduler, FftSpectrumSource, FrequencyBands, LiveCapture,
};

#[derive(Parser)]
#[command(name = "flowbeat-live")]
#[command(about = "Live beat detection on the default input device")]
struct Args {
    /// Engine configuration (JSON); unspecified values use defaults
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Seconds between band level summaries (0 disables them)
    #[arg(long, default_value = "1.0")]
    summary_interval: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    info!("Starting flowbeat live analysis");

    let config = match &args.config {
        Some(path) => AnalysisConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AnalysisConfig::default(),
    };

    let source = FftSpectrumSource::new(config.spectrum_size)?;
    let capture = LiveCapture::start(source.feed()).context("failed to open audio input")?;
    info!(
        "Capturing from {} at {} Hz",
        capture.device_name(),
        capture.sample_rate()
    );

    let scheduler = AnalysisScheduler::new(config, source)?;
    let events = scheduler.subscribe()?;
    let engine = scheduler.start();
    let handle = engine.handle();

    // Events arrive on a crossbeam channel; log them off the runtime.
    let logger = std::thread::spawn(move || {
        for event in events.iter() {
            match event {
                AnalysisEvent::BeatDetected(beat) => info!(
                    "{:>8.3}s {:?}{} strength {:.2} confidence {:.2}",
                    beat.timestamp,
                    beat.kind,
                    if beat.is_strong_beat { " (strong)" } else { "" },
                    beat.intensity,
                    beat.confidence
                ),
                AnalysisEvent::BpmChanged { timestamp, bpm } => {
                    info!("{:>8.3}s tempo {:.1} BPM", timestamp, bpm)
                }
                AnalysisEvent::EnergyUpdate { .. } => {}
            }
        }
    });

    let summaries = async {
        if args.summary_interval <= 0.0 {
            return std::future::pending::<()>().await;
        }
        let mut interval = tokio::time::interval(Duration::from_secs_f32(args.summary_interval));
        loop {
            interval.tick().await;
            match handle.snapshot() {
                Ok(snapshot) => {
                    let bands = FrequencyBands::from(&*snapshot);
                    info!(
                        "sub {:.2} bass {:.2} mid {:.2} treble {:.2} presence {:.2} | {:.1} BPM",
                        bands.sub_bass,
                        bands.bass,
                        bands.mid,
                        bands.treble,
                        bands.presence,
                        snapshot.current_bpm
                    );
                }
                Err(err) => warn!("Snapshot unavailable: {}", err),
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
        _ = summaries => {}
    }

    engine.shutdown().await?;
    drop(capture);
    drop(handle);
    if logger.join().is_err() {
        warn!("Event logger thread panicked");
    }
    info!("Stopped");
    Ok(())
}

//! Per-tick cost of the analysis chain, which has to stay well under the
//! 16.7 ms budget of a 60 Hz tick.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flowbeat::audio::{AnalysisConfig, AnalysisPipeline, FftSpectrumSource, SpectrumSource};

fn bench_pipeline_tick(c: &mut Criterion) {
    let config = AnalysisConfig::default();
    let mut pipeline = AnalysisPipeline::new(&config).unwrap();
    let frame: Vec<f32> = (0..config.spectrum_size)
        .map(|i| ((i as f32 * 0.13).sin().abs()) * 0.5)
        .collect();

    let mut timestamp = 0.0;
    c.bench_function("pipeline_tick_1024", |b| {
        b.iter(|| {
            timestamp += 1.0 / 60.0;
            let _ = pipeline.process(black_box(timestamp), black_box(&frame));
        });
    });
}

fn bench_fft_spectrum(c: &mut Criterion) {
    let config = AnalysisConfig::default();
    let mut source = FftSpectrumSource::new(config.spectrum_size).unwrap();
    let samples: Vec<f32> = (0..44100 / 60)
        .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / 44100.0).sin() * 0.5)
        .collect();
    let mut frame = vec![0.0; config.spectrum_size];

    c.bench_function("fft_spectrum_1024", |b| {
        b.iter(|| {
            source.push_samples(black_box(&samples));
            let _ = source.read_spectrum(config.window, black_box(&mut frame));
        });
    });
}

criterion_group!(benches, bench_pipeline_tick, bench_fft_spectrum);
criterion_main!(benches);

use crossbeam_channel::Receiver;
use log::{debug, error, info, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::config::{AnalysisConfig, ExecutionMode};
use super::error::{AnalysisError, Result};
use super::events::{AnalysisEvent, AnalysisHandle, AnalysisSnapshot, Publisher};
use super::pipeline::{AnalysisPipeline, TickOutput};
use super::spectrum::SpectrumSource;

/// What a worker hands back: the pipeline and frame it borrowed, plus the
/// tick result.
struct Completed {
    pipeline: AnalysisPipeline,
    frame: Vec<f32>,
    panicked: bool,
    result: Result<TickOutput>,
}

/// Drives an [`AnalysisPipeline`] at a fixed tick rate.
///
/// Each tick acquires one spectrum frame, runs the pipeline either inline or
/// on a blocking worker, then publishes the result. At most one tick is in
/// flight: the previous tick is always joined and published before the next
/// frame is read, so published state and events stay in tick order.
pub struct AnalysisScheduler<S> {
    config: AnalysisConfig,
    source: S,
    // `None` while a worker owns them
    pipeline: Option<AnalysisPipeline>,
    frame: Option<Vec<f32>>,
    in_flight: Option<JoinHandle<Completed>>,
    publisher: Publisher,
    failed_ticks: u64,
}

impl<S: SpectrumSource + 'static> AnalysisScheduler<S> {
    pub fn new(config: AnalysisConfig, source: S) -> Result<Self> {
        let pipeline = AnalysisPipeline::new(&config)?;
        let publisher = Publisher::new(AnalysisSnapshot::initial(&config), config.event_queue_capacity);

        info!(
            "Analysis engine: {} bands over {} bins at {} Hz ({:?})",
            config.band_count, config.spectrum_size, config.tick_rate_hz, config.execution
        );

        Ok(Self {
            frame: Some(vec![0.0; config.spectrum_size]),
            pipeline: Some(pipeline),
            config,
            source,
            in_flight: None,
            publisher,
            failed_ticks: 0,
        })
    }

    pub fn handle(&self) -> AnalysisHandle {
        self.publisher.handle()
    }

    pub fn subscribe(&self) -> Result<Receiver<AnalysisEvent>> {
        self.publisher.handle().subscribe()
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Ticks discarded because the source, the pipeline or the worker failed.
    pub fn failed_ticks(&self) -> u64 {
        self.failed_ticks
    }

    /// Run one tick stamped `timestamp` seconds into the stream.
    ///
    /// In worker mode the tick is only dispatched; its results are published
    /// by the next `tick` or by [`flush`](Self::flush). A failing tick is
    /// logged and discarded and the previously published state stays
    /// visible. Errors are returned only when published state can no longer
    /// be updated.
    pub async fn tick(&mut self, timestamp: f64) -> Result<()> {
        self.flush().await?;

        let mut frame = match self.frame.take() {
            Some(frame) => frame,
            None => vec![0.0; self.config.spectrum_size],
        };
        if let Err(err) = self.source.read_spectrum(self.config.window, &mut frame) {
            warn!("Discarding tick at {:.3}s: {}", timestamp, err);
            self.failed_ticks += 1;
            self.frame = Some(frame);
            return Ok(());
        }

        let pipeline = match self.pipeline.take() {
            Some(pipeline) => pipeline,
            None => AnalysisPipeline::new(&self.config)?,
        };

        match self.config.execution {
            ExecutionMode::Inline => {
                let completed = run_tick(pipeline, frame, timestamp);
                self.complete(completed)
            }
            ExecutionMode::Worker => {
                self.in_flight = Some(tokio::task::spawn_blocking(move || {
                    run_tick(pipeline, frame, timestamp)
                }));
                Ok(())
            }
        }
    }

    /// Wait for an in-flight tick, if any, and publish it.
    pub async fn flush(&mut self) -> Result<()> {
        let Some(worker) = self.in_flight.take() else {
            return Ok(());
        };

        match worker.await {
            Ok(completed) => self.complete(completed),
            Err(err) => {
                // the pipeline went down with the task
                error!("Analysis worker lost: {}", err);
                self.failed_ticks += 1;
                self.pipeline = Some(AnalysisPipeline::new(&self.config)?);
                Ok(())
            }
        }
    }

    fn complete(&mut self, completed: Completed) -> Result<()> {
        self.frame = Some(completed.frame);
        self.pipeline = Some(if completed.panicked {
            AnalysisPipeline::new(&self.config)?
        } else {
            completed.pipeline
        });

        match completed.result {
            Ok(output) => {
                if let Some(beat) = &output.beat {
                    debug!(
                        "Beat at {:.3}s: {:?} strength {:.2} confidence {:.2}",
                        beat.timestamp, beat.kind, beat.intensity, beat.confidence
                    );
                }
                if let Some(bpm) = output.bpm_changed {
                    info!("Tempo now {:.1} BPM", bpm);
                }
                self.publisher
                    .publish(&output, self.config.beat_cooldown_seconds as f64)
            }
            Err(err @ AnalysisError::WorkerPanicked(_)) => {
                error!("{}; analysis state rebuilt", err);
                self.failed_ticks += 1;
                Ok(())
            }
            Err(err) => {
                warn!("Discarding tick: {}", err);
                self.failed_ticks += 1;
                Ok(())
            }
        }
    }

    /// Clear all analysis state and republish the idle snapshot.
    pub async fn reset(&mut self) -> Result<()> {
        self.flush().await?;
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.reset();
        }
        self.publisher.replace(AnalysisSnapshot::initial(&self.config))?;
        info!("Analysis state reset");
        Ok(())
    }

    /// Swap in a new configuration. Implies a full reset.
    pub async fn reconfigure(&mut self, config: AnalysisConfig) -> Result<()> {
        let pipeline = AnalysisPipeline::new(&config)?;
        self.flush().await?;

        self.pipeline = Some(pipeline);
        self.frame = Some(vec![0.0; config.spectrum_size]);
        self.publisher.replace(AnalysisSnapshot::initial(&config))?;
        self.publisher.set_queue_capacity(config.event_queue_capacity);
        self.config = config;
        info!(
            "Reconfigured: {} bands over {} bins at {} Hz",
            self.config.band_count, self.config.spectrum_size, self.config.tick_rate_hz
        );
        Ok(())
    }

    /// Tick on the wall clock until `shutdown` flips to `true` or its sender
    /// is dropped. Missed ticks are delayed, never bursted.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let started = Instant::now();

        info!("Analysis loop started");
        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let timestamp = started.elapsed().as_secs_f64();
                    self.tick(timestamp).await?;
                }
            }
        }

        self.flush().await?;
        info!(
            "Analysis loop stopped ({} failed ticks)",
            self.failed_ticks
        );
        Ok(())
    }

    /// Build a scheduler and start it on its own task. Must be called from
    /// within a Tokio runtime.
    pub fn spawn(config: AnalysisConfig, source: S) -> Result<RunningEngine> {
        Ok(Self::new(config, source)?.start())
    }

    /// Move this scheduler onto its own task. Subscriptions taken before the
    /// call see every tick from the first one on.
    pub fn start(mut self) -> RunningEngine {
        let handle = self.handle();
        let (shutdown, receiver) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(receiver).await });
        RunningEngine {
            handle,
            shutdown,
            task,
        }
    }
}

impl<S> Drop for AnalysisScheduler<S> {
    fn drop(&mut self) {
        if self.in_flight.is_some() {
            // the worker owns its data, so it finishes harmlessly in the background
            debug!("Scheduler dropped with a tick in flight; result discarded");
        }
    }
}

/// An engine running on its own task.
pub struct RunningEngine {
    handle: AnalysisHandle,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl RunningEngine {
    pub fn handle(&self) -> AnalysisHandle {
        self.handle.clone()
    }

    pub fn subscribe(&self) -> Result<Receiver<AnalysisEvent>> {
        self.handle.subscribe()
    }

    /// Stop ticking and wait for the in-flight tick to be published.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(AnalysisError::WorkerPanicked(err.to_string())),
        }
    }
}

fn run_tick(mut pipeline: AnalysisPipeline, frame: Vec<f32>, timestamp: f64) -> Completed {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| pipeline.process(timestamp, &frame)));
    let (panicked, result) = match outcome {
        Ok(result) => (false, result),
        Err(payload) => (true, Err(AnalysisError::WorkerPanicked(panic_message(payload)))),
    };
    Completed {
        pipeline,
        frame,
        panicked,
        result,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

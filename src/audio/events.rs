use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::beat_detector::BeatEvent;
use super::config::AnalysisConfig;
use super::energy::EnergyState;
use super::error::{AnalysisError, Result};
use super::pipeline::TickOutput;

/// Notifications pushed to subscribers, in this order within a tick:
/// energy, then beat, then tempo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AnalysisEvent {
    /// Sent on every completed tick.
    EnergyUpdate { tick: u64, timestamp: f64, energy: EnergyState },
    BeatDetected(BeatEvent),
    BpmChanged { timestamp: f64, bpm: f32 },
}

/// Everything a consumer may read, published whole after each completed tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisSnapshot {
    /// Number of ticks completed so far.
    pub ticks: u64,
    pub timestamp: f64,
    pub band_levels: Vec<f32>,
    pub raw_bands: Vec<f32>,
    pub beat_strength: f32,
    pub energy: EnergyState,
    pub last_beat: Option<BeatEvent>,
    pub current_bpm: f32,
    pub beat_cooldown: f64,
}

impl AnalysisSnapshot {
    /// State before the first tick: silent bands, default tempo.
    pub fn initial(config: &AnalysisConfig) -> Self {
        Self {
            ticks: 0,
            timestamp: 0.0,
            band_levels: vec![0.0; config.band_count],
            raw_bands: vec![0.0; config.band_count],
            beat_strength: 0.0,
            energy: EnergyState::default(),
            last_beat: None,
            current_bpm: config.default_bpm,
            beat_cooldown: config.beat_cooldown_seconds as f64,
        }
    }

    fn from_tick(output: &TickOutput, beat_cooldown: f64) -> Self {
        Self {
            ticks: output.tick + 1,
            timestamp: output.timestamp,
            band_levels: output.band_levels.clone(),
            raw_bands: output.raw_bands.clone(),
            beat_strength: output.beat_strength,
            energy: output.energy,
            last_beat: output.last_beat,
            current_bpm: output.current_bpm,
            beat_cooldown,
        }
    }

    /// True when the last beat is within one cooldown window of this tick.
    ///
    /// Measured in stream time only: a snapshot that stops being replaced
    /// keeps answering for the tick it was taken at. Use
    /// [`AnalysisHandle::is_beat_active`] for a live answer.
    pub fn is_beat_active(&self) -> bool {
        self.is_beat_active_at(self.timestamp)
    }

    /// True when the last beat is within one cooldown window of `now`
    /// (stream seconds).
    pub fn is_beat_active_at(&self, now: f64) -> bool {
        self.last_beat.map_or(false, |beat| {
            now >= beat.timestamp && now - beat.timestamp <= self.beat_cooldown
        })
    }
}

struct Published {
    snapshot: Arc<AnalysisSnapshot>,
    at: Instant,
}

struct Subscriber {
    sender: Sender<AnalysisEvent>,
    /// Events lost since this subscriber last had room.
    dropped: u64,
}

struct Shared {
    published: Mutex<Published>,
    subscribers: Mutex<Vec<Subscriber>>,
    queue_capacity: AtomicUsize,
}

/// Cloneable read side of a running engine.
///
/// Reads never block on the analysis itself: they copy out of the last
/// published snapshot, so a reader sees either the previous tick or the new
/// one, never a mix.
#[derive(Clone)]
pub struct AnalysisHandle {
    shared: Arc<Shared>,
}

impl AnalysisHandle {
    pub fn snapshot(&self) -> Result<Arc<AnalysisSnapshot>> {
        let guard = self.shared.published.lock().map_err(|_| AnalysisError::Poisoned)?;
        Ok(Arc::clone(&guard.snapshot))
    }

    pub fn band_levels(&self) -> Result<Vec<f32>> {
        Ok(self.snapshot()?.band_levels.clone())
    }

    pub fn band_level(&self, index: usize) -> Result<f32> {
        let snapshot = self.snapshot()?;
        snapshot
            .band_levels
            .get(index)
            .copied()
            .ok_or(AnalysisError::BandOutOfRange {
                index,
                band_count: snapshot.band_levels.len(),
            })
    }

    pub fn current_bpm(&self) -> Result<f32> {
        Ok(self.snapshot()?.current_bpm)
    }

    /// Beat window check against the stream clock advanced by the wall time
    /// since the last publish, so the flag still expires when ticks stop.
    pub fn is_beat_active(&self) -> Result<bool> {
        let guard = self.shared.published.lock().map_err(|_| AnalysisError::Poisoned)?;
        let now = guard.snapshot.timestamp + guard.at.elapsed().as_secs_f64();
        Ok(guard.snapshot.is_beat_active_at(now))
    }

    pub fn latest_beat(&self) -> Result<Option<BeatEvent>> {
        Ok(self.snapshot()?.last_beat)
    }

    pub fn energy(&self) -> Result<EnergyState> {
        Ok(self.snapshot()?.energy)
    }

    /// New event stream. Events published before this call are not replayed.
    ///
    /// The queue holds `event_queue_capacity` events. A subscriber that falls
    /// that far behind loses new events until it reads again.
    pub fn subscribe(&self) -> Result<Receiver<AnalysisEvent>> {
        let capacity = self.shared.queue_capacity.load(Ordering::Relaxed);
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        self.shared
            .subscribers
            .lock()
            .map_err(|_| AnalysisError::Poisoned)?
            .push(Subscriber { sender, dropped: 0 });
        Ok(receiver)
    }
}

/// Write side, owned by the scheduler.
pub(crate) struct Publisher {
    shared: Arc<Shared>,
}

impl Publisher {
    pub(crate) fn new(initial: AnalysisSnapshot, queue_capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                published: Mutex::new(Published {
                    snapshot: Arc::new(initial),
                    at: Instant::now(),
                }),
                subscribers: Mutex::new(Vec::new()),
                queue_capacity: AtomicUsize::new(queue_capacity),
            }),
        }
    }

    /// Applies to subscriptions made from now on.
    pub(crate) fn set_queue_capacity(&self, capacity: usize) {
        self.shared.queue_capacity.store(capacity, Ordering::Relaxed);
    }

    pub(crate) fn handle(&self) -> AnalysisHandle {
        AnalysisHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Replace the published snapshot without notifying anyone.
    pub(crate) fn replace(&self, snapshot: AnalysisSnapshot) -> Result<()> {
        *self.shared.published.lock().map_err(|_| AnalysisError::Poisoned)? = Published {
            snapshot: Arc::new(snapshot),
            at: Instant::now(),
        };
        Ok(())
    }

    /// Swap in the tick's snapshot, then notify subscribers.
    pub(crate) fn publish(&self, output: &TickOutput, beat_cooldown: f64) -> Result<()> {
        self.replace(AnalysisSnapshot::from_tick(output, beat_cooldown))?;

        let mut events = Vec::with_capacity(3);
        events.push(AnalysisEvent::EnergyUpdate {
            tick: output.tick,
            timestamp: output.timestamp,
            energy: output.energy,
        });
        if let Some(beat) = output.beat {
            events.push(AnalysisEvent::BeatDetected(beat));
        }
        if let Some(bpm) = output.bpm_changed {
            events.push(AnalysisEvent::BpmChanged {
                timestamp: output.timestamp,
                bpm,
            });
        }

        let mut subscribers = self
            .shared
            .subscribers
            .lock()
            .map_err(|_| AnalysisError::Poisoned)?;
        subscribers.retain_mut(|subscriber| {
            for event in &events {
                match subscriber.sender.try_send(event.clone()) {
                    Ok(()) => {
                        if subscriber.dropped > 0 {
                            debug!("Event subscriber caught up after {} dropped events", subscriber.dropped);
                            subscriber.dropped = 0;
                        }
                    }
                    Err(TrySendError::Full(_)) => {
                        if subscriber.dropped == 0 {
                            warn!("Event subscriber queue is full, dropping events until it reads");
                        }
                        subscriber.dropped += 1;
                    }
                    Err(TrySendError::Disconnected(_)) => return false,
                }
            }
            true
        });
        Ok(())
    }
}

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

/// A playback device as seen by the scheduler.
///
/// Implementations are shared across sessions; the engine only holds a handle,
/// it never creates or tears the device down.
pub trait AudioClock: Send + Sync {
    /// Current position on the output timeline, in seconds.
    fn now(&self) -> f64;

    /// Queues `samples` to start playing at `at` (or immediately if `at` has
    /// already passed). Returns the actual start time.
    fn schedule(&self, samples: &[f32], sample_rate: u32, at: f64) -> f64;

    /// Silences everything scheduled so far.
    fn stop_all(&self);

    /// Scheduled sources that have not finished playing.
    fn active_sources(&self) -> usize;

    fn resume(&self) {}

    fn suspend(&self) {}
}

/// Tracks in-flight sources by their end times.
#[derive(Default)]
pub(crate) struct SourceTracker {
    ends: Mutex<VecDeque<f64>>,
}

impl SourceTracker {
    pub(crate) fn add(&self, end: f64) {
        if let Ok(mut ends) = self.ends.lock() {
            ends.push_back(end);
        }
    }

    pub(crate) fn active(&self, now: f64) -> usize {
        match self.ends.lock() {
            Ok(mut ends) => {
                ends.retain(|end| *end > now);
                ends.len()
            }
            Err(_) => 0,
        }
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut ends) = self.ends.lock() {
            ends.clear();
        }
    }
}

enum TimeSource {
    Manual(Mutex<f64>),
    Wall(Instant),
}

/// A clock with no audio device behind it.
///
/// `manual()` only moves when told to, which is what tests drive;
/// `wall()` follows the monotonic system clock for headless hosts.
pub struct VirtualClock {
    time: TimeSource,
    sources: SourceTracker,
}

impl VirtualClock {
    pub fn manual() -> Self {
        Self {
            time: TimeSource::Manual(Mutex::new(0.0)),
            sources: SourceTracker::default(),
        }
    }

    pub fn wall() -> Self {
        Self {
            time: TimeSource::Wall(Instant::now()),
            sources: SourceTracker::default(),
        }
    }

    /// Moves a manual clock forward. No-op on a wall clock.
    pub fn advance(&self, seconds: f64) {
        if let TimeSource::Manual(t) = &self.time {
            if let Ok(mut t) = t.lock() {
                *t += seconds.max(0.0);
            }
        }
    }

    /// Moves a manual clock forward by milliseconds.
    pub fn advance_ms(&self, ms: f64) {
        self.advance(ms / 1000.0);
    }
}

impl AudioClock for VirtualClock {
    fn now(&self) -> f64 {
        match &self.time {
            TimeSource::Manual(t) => t.lock().map(|t| *t).unwrap_or(0.0),
            TimeSource::Wall(origin) => origin.elapsed().as_secs_f64(),
        }
    }

    fn schedule(&self, samples: &[f32], sample_rate: u32, at: f64) -> f64 {
        let start = at.max(self.now());
        let duration = if sample_rate == 0 {
            0.0
        } else {
            samples.len() as f64 / sample_rate as f64
        };
        self.sources.add(start + duration);
        start
    }

    fn stop_all(&self) {
        self.sources.clear();
    }

    fn active_sources(&self) -> usize {
        self.sources.active(self.now())
    }
}

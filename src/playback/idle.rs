use log::{debug, warn};
use ringbuf::{ring_buffer::RbBase, HeapRb, Rb};

use crate::blendshape::Weights;
use crate::config::IdleConfig;
use crate::events::AvatarStatus;

use super::pool::{BlendshapeResult, FramePool, PoolSlot};

#[derive(Debug, Clone, PartialEq)]
pub struct BlendshapeFrame {
    pub weights: Weights,
    pub timestamp: f64,
}

/// Fixed-capacity frame ring with a SPEAKING / LISTENING status machine.
///
/// `get_frame` advances at most once per `1 / target_fps` seconds. The result
/// it returns is borrowed from an internal pool and is recycled on the next call.
pub struct IdleFrameBuffer {
    config: IdleConfig,
    frames: HeapRb<BlendshapeFrame>,
    pool: FramePool,
    outstanding: Option<PoolSlot>,

    held: Option<Weights>,
    status: AvatarStatus,
    speech_ended: bool,
    end_reported: bool,
    last_tick: Option<f64>,
}

impl IdleFrameBuffer {
    pub fn new(config: IdleConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            config,
            frames: HeapRb::new(capacity),
            pool: FramePool::with_capacity(2),
            outstanding: None,
            held: None,
            status: AvatarStatus::Listening,
            speech_ended: false,
            end_reported: false,
            last_tick: None,
        }
    }

    pub fn push(&mut self, frame: BlendshapeFrame) {
        if self.frames.is_full() {
            warn!("Blendshape buffer full, dropping oldest frame");
        }
        self.frames.push_overwrite(frame);
        self.speech_ended = false;
        self.end_reported = false;
    }

    /// No more frames are coming for this utterance.
    pub fn mark_speech_ended(&mut self) {
        self.speech_ended = true;
    }

    pub fn reset(&mut self) {
        self.frames.clear();
        self.held = None;
        self.status = AvatarStatus::Listening;
        self.speech_ended = false;
        self.end_reported = false;
        self.last_tick = None;
    }

    pub fn status(&self) -> AvatarStatus {
        self.status
    }

    pub fn buffered(&self) -> usize {
        self.frames.len()
    }

    /// Pose for time `now` (seconds).
    pub fn get_frame(&mut self, now: f64) -> &BlendshapeResult {
        if let Some(previous) = self.outstanding.take() {
            self.pool.release(previous);
        }
        let slot = self.pool.acquire();

        let mut end_of_speech = false;
        if self.tick_elapsed(now) {
            self.last_tick = Some(now);
            end_of_speech = self.advance();
        }

        let weights = match (self.status, self.held) {
            (AvatarStatus::Speaking, Some(held)) => held,
            _ => Weights::NEUTRAL,
        };
        let record = self.pool.get_mut(&slot);
        record.weights = weights;
        record.status = self.status;
        record.end_of_speech = end_of_speech;

        let slot = self.outstanding.insert(slot);
        self.pool.get(slot)
    }

    fn tick_elapsed(&self, now: f64) -> bool {
        let interval = if self.config.target_fps > 0.0 { 1.0 / self.config.target_fps } else { 0.0 };
        match self.last_tick {
            Some(last) => now - last >= interval || now < last,
            None => true,
        }
    }

    /// Returns true on the one tick where ended speech finishes draining.
    fn advance(&mut self) -> bool {
        match self.frames.pop() {
            Some(next) => {
                self.status = AvatarStatus::Speaking;
                self.held = Some(match self.held {
                    Some(held) if self.config.interpolate => held.lerp(&next.weights, self.config.smoothing),
                    _ => next.weights,
                });
                false
            }
            None if self.speech_ended => {
                // Go neutral explicitly rather than freezing on the last pose
                self.status = AvatarStatus::Listening;
                self.held = None;
                if self.end_reported {
                    return false;
                }
                self.end_reported = true;
                debug!("Blendshape stream drained");
                true
            }
            // Mid-utterance underrun: keep the current pose
            None => false,
        }
    }
}

use crate::blendshape::Weights;

/// One combined audio + blendshape unit as delivered by the transport.
#[derive(Debug, Clone)]
pub struct SyncFrame {
    /// Raw PCM16 LE mono bytes.
    pub audio: Vec<u8>,
    pub weights: Weights,
    pub timestamp: f64,
    pub frame_index: u64,
    pub session_id: Option<String>,
}

/// A frame whose audio has been handed to the clock.
///
/// Active on the half-open interval `[start, end)` of the clock timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledFrame {
    pub weights: Weights,
    pub start: f64,
    pub end: f64,
    pub frame_index: u64,
}

impl ScheduledFrame {
    pub fn contains(&self, t: f64) -> bool {
        self.start <= t && t < self.end
    }
}

/// Read-only snapshot of the engine, recomputed on every call.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub current_frame_index: Option<u64>,
    pub queued_frames: usize,
    /// Seconds of audio played in this session, never negative.
    pub audio_playback_time: f64,
}

impl PlaybackState {
    pub fn ms_played(&self) -> f64 {
        self.audio_playback_time * 1000.0
    }
}

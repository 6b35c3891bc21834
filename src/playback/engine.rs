use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::audio::pcm::pcm16_to_f32;
use crate::audio::AudioClock;
use crate::blendshape::Weights;
use crate::config::PlaybackConfig;
use crate::events::{emit, EventSender, SyncEvent};

use super::frame::{PlaybackState, ScheduledFrame, SyncFrame};

/// What the last tick did, for the host loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// Not playing (buffering, stopped, or no session).
    Idle,
    Playing,
    /// Playback drained on this tick; the end notification has been sent.
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    Frame(u64),
    Neutral,
}

/// Audio is the master timeline: frames go to the clock a short look-ahead
/// before they are due, and the pose for "now" is the scheduled frame whose
/// interval contains the clock time.
pub struct PlaybackEngine {
    clock: Arc<dyn AudioClock>,
    config: PlaybackConfig,
    events: EventSender,

    session_id: Option<String>,
    sample_rate: u32,

    queue: VecDeque<SyncFrame>,
    scheduled: VecDeque<ScheduledFrame>,
    /// Planned start of the next unscheduled frame.
    next_start: Option<f64>,
    audio_start: Option<f64>,
    search_from: usize,
    last_index: Option<u64>,
    current_frame: Option<u64>,
    last_selection: Option<Selection>,

    playing: bool,
    stopped: bool,
    end_notified: bool,
    visible: bool,
    dropped_while_stopped: u64,
}

impl PlaybackEngine {
    pub fn new(clock: Arc<dyn AudioClock>, config: PlaybackConfig, events: EventSender) -> Self {
        let sample_rate = config.default_sample_rate;
        Self {
            clock,
            config,
            events,
            session_id: None,
            sample_rate,
            queue: VecDeque::new(),
            scheduled: VecDeque::new(),
            next_start: None,
            audio_start: None,
            search_from: 0,
            last_index: None,
            current_frame: None,
            last_selection: None,
            playing: false,
            stopped: false,
            end_notified: false,
            visible: true,
            dropped_while_stopped: 0,
        }
    }

    /// Hard-resets everything and adopts a new session. Anything still playing
    /// from the previous session is silenced, not drained.
    pub fn start_session(&mut self, session_id: &str, sample_rate: Option<u32>) {
        if self.playing || !self.queue.is_empty() {
            debug!(
                "Session {:?} replaced mid-playback ({} queued, {} scheduled)",
                self.session_id,
                self.queue.len(),
                self.scheduled.len()
            );
        }
        self.clock.stop_all();
        self.clock.resume();
        self.reset_buffers();

        self.session_id = Some(session_id.to_string());
        self.sample_rate = sample_rate.filter(|r| *r > 0).unwrap_or(self.config.default_sample_rate);
        self.audio_start = None;
        self.last_index = None;
        self.stopped = false;
        self.end_notified = false;
        self.dropped_while_stopped = 0;

        if matches!(self.last_selection, Some(Selection::Frame(_))) {
            self.emit_selection(Selection::Neutral, &Weights::NEUTRAL);
        }
        info!("Session {} started at {}Hz", session_id, self.sample_rate);
    }

    pub fn add_frame(&mut self, frame: SyncFrame) {
        if self.stopped {
            self.dropped_while_stopped += 1;
            let every = self.config.stopped_drop_log_every.max(1);
            if (self.dropped_while_stopped - 1) % every == 0 {
                warn!(
                    "Dropping frame {} while stopped ({} dropped so far)",
                    frame.frame_index, self.dropped_while_stopped
                );
            }
            return;
        }

        if let (Some(current), Some(incoming)) = (&self.session_id, &frame.session_id) {
            if current != incoming {
                debug!("Dropping frame {} from stale session {}", frame.frame_index, incoming);
                return;
            }
        }

        if let Some(last) = self.last_index {
            if frame.frame_index != last.wrapping_add(1) {
                warn!("Frame gap: expected {}, got {}", last.wrapping_add(1), frame.frame_index);
            }
        }
        self.last_index = Some(frame.frame_index);
        self.queue.push_back(frame);

        if !self.playing && self.queue.len() >= self.config.min_buffer_frames.max(1) {
            self.begin_playback();
        }
    }

    /// The transport has no more frames for this session; let the queue drain.
    /// Returns `Ended` if there was nothing left to play.
    pub fn mark_stream_ended(&mut self) -> TickStatus {
        if self.playing || self.stopped || self.session_id.is_none() {
            return if self.playing { TickStatus::Playing } else { TickStatus::Idle };
        }
        // Short turns never reach the start threshold
        if !self.queue.is_empty() {
            self.begin_playback();
            return TickStatus::Playing;
        }
        if self.finish() {
            TickStatus::Ended
        } else {
            TickStatus::Idle
        }
    }

    /// Hidden surfaces skip pose selection; audio scheduling carries on.
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// One pass of the playback loop. Call once per display refresh.
    pub fn tick(&mut self) -> TickStatus {
        if !self.playing {
            return TickStatus::Idle;
        }

        let now = self.clock.now();
        self.schedule_ahead(now);
        if self.visible {
            self.select(now);
        }
        self.cleanup(now);

        if self.queue.is_empty() && self.clock.active_sources() == 0 {
            // Frames that arrive later restart playback at the threshold
            return if self.finish() { TickStatus::Ended } else { TickStatus::Idle };
        }
        TickStatus::Playing
    }

    /// Halts audio, drops every queued and scheduled frame, and goes neutral.
    /// Frames are refused until the next `start_session`.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.clock.stop_all();
        self.reset_buffers();
        self.force_neutral();
        info!("Playback stopped (session {:?})", self.session_id);
    }

    pub fn state(&self) -> PlaybackState {
        let audio_playback_time = match self.audio_start {
            Some(start) => (self.clock.now() - start).max(0.0),
            None => 0.0,
        };
        PlaybackState {
            is_playing: self.playing,
            current_frame_index: self.current_frame,
            queued_frames: self.queue.len(),
            audio_playback_time,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn scheduled(&self) -> impl Iterator<Item = &ScheduledFrame> {
        self.scheduled.iter()
    }

    fn begin_playback(&mut self) {
        self.playing = true;
        self.next_start = None;
        info!("Playback started with {} frames buffered", self.queue.len());
    }

    fn reset_buffers(&mut self) {
        self.queue.clear();
        self.scheduled.clear();
        self.next_start = None;
        self.search_from = 0;
        self.current_frame = None;
        self.playing = false;
    }

    fn schedule_ahead(&mut self, now: f64) {
        let lookahead = self.config.lookahead_ms / 1000.0;
        loop {
            // A stalled timeline restarts at the current clock time
            let planned = match self.next_start {
                Some(t) if t >= now => t,
                _ => now,
            };
            if planned - now > lookahead {
                break;
            }
            let Some(frame) = self.queue.pop_front() else {
                break;
            };

            let samples = pcm16_to_f32(&frame.audio);
            let start = self.clock.schedule(&samples, self.sample_rate, planned.max(now));
            let end = start + samples.len() as f64 / self.sample_rate as f64;
            if self.audio_start.is_none() {
                self.audio_start = Some(start);
            }
            self.scheduled.push_back(ScheduledFrame {
                weights: frame.weights,
                start,
                end,
                frame_index: frame.frame_index,
            });
            self.next_start = Some(end);
        }
    }

    fn find_active(&self, now: f64) -> Option<usize> {
        let from = self.search_from.min(self.scheduled.len());
        for (i, frame) in self.scheduled.iter().enumerate().skip(from) {
            if frame.contains(now) {
                return Some(i);
            }
            if frame.start > now {
                break;
            }
        }
        // Clock went backwards or the cache is stale
        self.scheduled.iter().take(from).position(|f| f.contains(now))
    }

    /// Most recent frame that has already finished, if `now` is within its grace window.
    fn recent_within_grace(&self, now: f64) -> Option<usize> {
        let grace = self.config.selection_grace_ms / 1000.0;
        let i = self.scheduled.iter().rposition(|f| f.start <= now)?;
        let frame = &self.scheduled[i];
        (now >= frame.end && now < frame.end + grace).then_some(i)
    }

    fn select(&mut self, now: f64) {
        let found = match self.find_active(now) {
            Some(i) => {
                self.search_from = i;
                Some(i)
            }
            None => self.recent_within_grace(now),
        };

        match found {
            Some(i) => {
                let frame = &self.scheduled[i];
                let (index, weights) = (frame.frame_index, frame.weights);
                self.current_frame = Some(index);
                self.emit_selection(Selection::Frame(index), &weights);
            }
            None => {
                self.current_frame = None;
                self.emit_selection(Selection::Neutral, &Weights::NEUTRAL);
            }
        }
    }

    fn cleanup(&mut self, now: f64) {
        let horizon = now - self.config.retention_ms / 1000.0;
        while self.scheduled.front().map_or(false, |f| f.end < horizon) {
            self.scheduled.pop_front();
            self.search_from = self.search_from.saturating_sub(1);
        }
    }

    /// Goes neutral and sends the end notification. Returns false if this
    /// session already reported its end.
    fn finish(&mut self) -> bool {
        self.playing = false;
        self.scheduled.clear();
        self.search_from = 0;
        self.next_start = None;
        self.current_frame = None;
        if self.end_notified {
            debug!("Late frames drained for session {:?}", self.session_id);
            self.emit_selection(Selection::Neutral, &Weights::NEUTRAL);
            return false;
        }
        self.end_notified = true;
        self.force_neutral();
        emit(&self.events, SyncEvent::PlaybackEnded);
        info!("Playback ended (session {:?})", self.session_id);
        true
    }

    /// Sent even if the face is already neutral.
    fn force_neutral(&mut self) {
        self.last_selection = Some(Selection::Neutral);
        emit(&self.events, SyncEvent::Weights(Weights::NEUTRAL));
    }

    /// Weight updates go out only when the chosen pose changes.
    fn emit_selection(&mut self, selection: Selection, weights: &Weights) {
        if self.last_selection == Some(selection) {
            return;
        }
        self.last_selection = Some(selection);
        emit(&self.events, SyncEvent::Weights(*weights));
    }
}

use std::sync::Arc;

use log::{debug, info, warn};

use crate::audio::AudioClock;
use crate::blendshape::Weights;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::{emit, AvatarStatus, EventSender, Role, SyncEvent};
use crate::interrupt::{InterruptController, StopDecision};
use crate::playback::{IdleFrameBuffer, PlaybackEngine, TickStatus};
use crate::protocol::{self, ProtocolEvent};
use crate::transcription::{Released, SubtitleChunker, TranscriptDelta, TranscriptSync};

#[derive(Default)]
struct TurnState {
    open: bool,
    playback_done: bool,
    finalized: bool,
    /// Server text from `transcript_done`, held until playback ends.
    pending_final: Option<String>,
}

pub struct AvatarSession {
    config: SyncConfig,
    clock: Arc<dyn AudioClock>,
    events: EventSender,

    engine: PlaybackEngine,
    idle: IdleFrameBuffer,
    transcript: TranscriptSync,
    subtitles: SubtitleChunker,
    interrupts: InterruptController,

    turn: TurnState,
    user_line: String,
    idle_active: bool,
    last_idle: Option<Weights>,
    status: AvatarStatus,
}

impl AvatarSession {
    pub fn new(clock: Arc<dyn AudioClock>, config: SyncConfig, events: EventSender) -> Self {
        Self {
            engine: PlaybackEngine::new(clock.clone(), config.playback.clone(), events.clone()),
            idle: IdleFrameBuffer::new(config.idle.clone()),
            transcript: TranscriptSync::new(),
            subtitles: SubtitleChunker::new(config.subtitles.clone()),
            interrupts: InterruptController::new(),
            turn: TurnState::default(),
            user_line: String::new(),
            idle_active: false,
            last_idle: None,
            status: AvatarStatus::Listening,
            config,
            clock,
            events,
        }
    }

    pub fn handle_json(&mut self, line: &str) -> Result<(), SyncError> {
        let event = ProtocolEvent::parse(line)?;
        self.handle(event);
        Ok(())
    }

    pub fn handle(&mut self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::AudioStart { turn_id, session_id, sample_rate, format } => {
                if let Some(format) = format.filter(|f| f != "pcm16") {
                    warn!("Unsupported audio format {:?}, decoding as pcm16", format);
                }
                self.start_turn(&turn_id, &session_id, sample_rate);
            }
            ProtocolEvent::SyncFrame { audio, weights, frame_index, session_id, timestamp } => {
                match protocol::decode_sync_frame(&audio, &weights, frame_index, session_id, timestamp) {
                    Ok(frame) => self.engine.add_frame(frame),
                    Err(e) => warn!("Dropping frame {}: {}", frame_index, e),
                }
            }
            ProtocolEvent::AudioEnd { session_id } => self.end_stream(session_id.as_deref()),
            ProtocolEvent::TranscriptDelta { role, text, start_offset, item_id, previous_item_id } => match role {
                Role::User => self.show_user(&text),
                Role::Assistant => self.push_assistant(TranscriptDelta {
                    role,
                    text,
                    start_offset_ms: start_offset,
                    item_id,
                    previous_item_id,
                }),
            },
            ProtocolEvent::TranscriptDone { role, text, interrupted } => self.transcript_done(role, text, interrupted),
            ProtocolEvent::Interrupt { turn_id, offset_ms } => self.interrupt(&turn_id, offset_ms),
            ProtocolEvent::BlendshapeFrame { weights, timestamp } => {
                match protocol::decode_blendshape_frame(&weights, timestamp) {
                    Ok(frame) => {
                        self.idle.push(frame);
                        self.idle_active = true;
                    }
                    Err(e) => warn!("Dropping blendshape frame: {}", e),
                }
            }
            ProtocolEvent::BlendshapeEnd => self.idle.mark_speech_ended(),
        }
    }

    /// Host entry point, once per display refresh.
    pub fn tick(&mut self) -> TickStatus {
        let status = self.engine.tick();

        let state = self.engine.state();
        let released = self.transcript.drain(state.is_playing, state.ms_played());
        self.show_released(released);

        if status == TickStatus::Ended {
            self.on_playback_end();
        }

        let now = self.clock.now();
        if let Some(cutoff) = self.interrupts.poll(now) {
            self.stop_at(cutoff);
        }
        if self.idle_active {
            self.tick_idle(now);
        }
        status
    }

    /// Hidden surfaces skip pose selection; audio keeps playing.
    pub fn set_visible(&mut self, visible: bool) {
        self.engine.set_visible(visible);
    }

    pub fn status(&self) -> AvatarStatus {
        self.status
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    pub fn transcript(&self) -> &TranscriptSync {
        &self.transcript
    }

    pub fn has_pending_stop(&self) -> bool {
        self.interrupts.has_pending_stop()
    }

    fn start_turn(&mut self, turn_id: &str, session_id: &str, sample_rate: Option<u32>) {
        self.close_turn();

        self.interrupts.begin_turn(turn_id);
        self.engine.start_session(session_id, sample_rate);
        self.subtitles.reset();
        // A transcript_done that beat audio_start belongs to this turn
        self.turn = TurnState {
            open: true,
            pending_final: self.turn.pending_final.take(),
            ..TurnState::default()
        };

        self.set_status(AvatarStatus::Speaking);

        let early = self.transcript.begin_turn();
        if !early.is_empty() {
            debug!("Replaying {} transcript fragments for turn {}", early.len(), turn_id);
        }
        for delta in early {
            self.push_assistant(delta);
        }
        info!("Turn {} started (session {})", turn_id, session_id);
    }

    /// Finalizes whatever the previous turn displayed if nothing else did.
    fn close_turn(&mut self) {
        if !self.turn.open {
            return;
        }
        if !self.turn.finalized {
            let text = match self.turn.pending_final.take() {
                Some(text) => text,
                None => self.transcript.display_text().to_string(),
            };
            if !text.is_empty() {
                self.finalize(text);
            }
        }
        self.turn.open = false;
    }

    fn end_stream(&mut self, session_id: Option<&str>) {
        if let (Some(incoming), Some(current)) = (session_id, self.engine.session_id()) {
            if incoming != current {
                debug!("Ignoring audio_end for stale session {}", incoming);
                return;
            }
        }
        if self.engine.mark_stream_ended() == TickStatus::Ended {
            self.on_playback_end();
        }
    }

    fn show_user(&mut self, text: &str) {
        self.user_line.push_str(text);
        self.subtitle(Role::User, self.user_line.clone());
    }

    fn push_assistant(&mut self, delta: TranscriptDelta) {
        let outcome = self.transcript.push(delta);
        for text in &outcome.accepted {
            if let Some(line) = self.subtitles.push_text(text) {
                self.subtitle(Role::Assistant, line);
            }
        }
        self.show_released(outcome.released);
    }

    fn show_released(&mut self, released: Vec<Released>) {
        for fragment in released {
            if let Some(line) = self.subtitles.words_spoken(&fragment.text) {
                self.subtitle(fragment.role, line);
            }
        }
    }

    fn transcript_done(&mut self, role: Role, text: String, interrupted: bool) {
        if role == Role::User {
            self.user_line.clear();
            emit(&self.events, SyncEvent::MessageFinal { role, text });
            return;
        }
        if self.interrupts.is_interrupted() {
            debug!("Turn was interrupted locally; keeping the truncated transcript");
            return;
        }
        if self.turn.finalized {
            debug!("Transcript already finalized for this turn");
            return;
        }
        if interrupted || self.turn.playback_done {
            self.finalize(text);
        } else {
            self.turn.pending_final = Some(text);
        }
    }

    fn interrupt(&mut self, turn_id: &str, cutoff_ms: f64) {
        if self.turn.playback_done {
            debug!("Interrupt for turn {} after playback finished", turn_id);
            return;
        }
        let ms_played = self.engine.state().ms_played();
        let Some(accepted) = self.interrupts.accept(turn_id, cutoff_ms, ms_played, self.clock.now()) else {
            return;
        };
        // Gate transcript release before anything else runs
        self.transcript
            .mark_interrupted(accepted.cutoff_ms + self.config.transcript.word_tolerance_ms);
        if accepted.decision == StopDecision::Immediate {
            self.stop_at(accepted.cutoff_ms);
        }
    }

    fn stop_at(&mut self, cutoff_ms: f64) {
        self.interrupts.cancel();
        self.engine.stop();
        self.idle.reset();
        self.idle_active = false;
        self.last_idle = None;

        let text = self
            .transcript
            .truncate(cutoff_ms, self.config.transcript.word_tolerance_ms)
            .to_string();
        self.transcript.end_turn();
        self.turn.playback_done = true;
        self.turn.pending_final = None;
        self.finalize(text);

        self.subtitles.reset();
        self.subtitle(Role::Assistant, String::new());
        self.set_status(AvatarStatus::Listening);
    }

    fn on_playback_end(&mut self) {
        // Audio ran out before the cutoff was reached
        if self.interrupts.has_pending_stop() {
            if let Some(cutoff) = self.interrupts.cutoff_ms() {
                self.stop_at(cutoff);
                return;
            }
        }

        let flushed = self.transcript.flush();
        for text in &flushed.accepted {
            self.subtitles.push_text(text);
        }
        if let Some(line) = self.subtitles.finish() {
            self.subtitle(Role::Assistant, line);
        }
        self.transcript.end_turn();
        self.turn.playback_done = true;
        if let Some(text) = self.turn.pending_final.take() {
            self.finalize(text);
        }
        self.set_status(AvatarStatus::Listening);
    }

    fn tick_idle(&mut self, now: f64) {
        let result = self.idle.get_frame(now);
        let (weights, status, end_of_speech) = (result.weights, result.status, result.end_of_speech);

        if self.last_idle != Some(weights) {
            self.last_idle = Some(weights);
            emit(&self.events, SyncEvent::Weights(weights));
        }
        if end_of_speech {
            self.idle_active = false;
            self.last_idle = None;
            self.set_status(AvatarStatus::Listening);
        } else if status == AvatarStatus::Speaking {
            self.set_status(AvatarStatus::Speaking);
        }
    }

    fn finalize(&mut self, text: String) {
        if self.turn.finalized {
            return;
        }
        self.turn.finalized = true;
        emit(&self.events, SyncEvent::MessageFinal { role: Role::Assistant, text });
    }

    fn subtitle(&self, role: Role, text: String) {
        emit(&self.events, SyncEvent::Subtitle { role, text });
    }

    fn set_status(&mut self, status: AvatarStatus) {
        if self.status != status {
            self.status = status;
            emit(&self.events, SyncEvent::Status(status));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::VirtualClock;
    use crate::blendshape::Blendshape;
    use crate::protocol::WireWeights;
    use base64::Engine;
    use crossbeam_channel::Receiver;
    use std::collections::HashMap;

    fn setup() -> (AvatarSession, Arc<VirtualClock>, Receiver<SyncEvent>) {
        let clock = Arc::new(VirtualClock::manual());
        let (tx, rx) = crossbeam_channel::unbounded();
        let session = AvatarSession::new(clock.clone(), SyncConfig::default(), tx);
        (session, clock, rx)
    }

    fn audio_start(turn: &str, session: &str) -> ProtocolEvent {
        ProtocolEvent::AudioStart {
            turn_id: turn.into(),
            session_id: session.into(),
            sample_rate: Some(24000),
            format: Some("pcm16".into()),
        }
    }

    // 40ms of silence at 24kHz
    fn sync_frame(session: &str, index: u64) -> ProtocolEvent {
        let mut weights = HashMap::new();
        weights.insert("jawOpen".to_string(), 0.5);
        ProtocolEvent::SyncFrame {
            audio: base64::engine::general_purpose::STANDARD.encode(vec![0u8; 1920]),
            weights: WireWeights::Named(weights),
            frame_index: index,
            session_id: Some(session.into()),
            timestamp: None,
        }
    }

    fn assistant(text: &str, offset: f64) -> ProtocolEvent {
        ProtocolEvent::TranscriptDelta {
            role: Role::Assistant,
            text: text.into(),
            start_offset: Some(offset),
            item_id: None,
            previous_item_id: None,
        }
    }

    fn done(text: &str) -> ProtocolEvent {
        ProtocolEvent::TranscriptDone { role: Role::Assistant, text: text.into(), interrupted: false }
    }

    fn run(session: &mut AvatarSession, clock: &VirtualClock, ticks: usize, step_ms: f64) {
        for _ in 0..ticks {
            clock.advance_ms(step_ms);
            session.tick();
        }
    }

    fn finals(events: &[SyncEvent]) -> Vec<(Role, String)> {
        events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::MessageFinal { role, text } => Some((*role, text.clone())),
                _ => None,
            })
            .collect()
    }

    fn subtitles(events: &[SyncEvent], want: Role) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::Subtitle { role, text } if *role == want => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_full_turn() {
        let (mut session, clock, rx) = setup();
        // Arrives before the turn exists
        session.handle(assistant("Hello", 1000.0));
        session.handle(audio_start("t1", "s1"));
        for i in 0..5 {
            session.handle(sync_frame("s1", i));
        }
        session.handle(assistant(" world", 1100.0));
        session.handle(ProtocolEvent::AudioEnd { session_id: Some("s1".into()) });
        session.handle(done("Hello world"));

        session.tick();
        run(&mut session, &clock, 30, 16.0);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.iter().filter(|e| **e == SyncEvent::PlaybackEnded).count(), 1);
        assert_eq!(finals(&events), vec![(Role::Assistant, "Hello world".to_string())]);
        assert!(subtitles(&events, Role::Assistant).contains(&"Hello world".to_string()));
        assert_eq!(events.first(), Some(&SyncEvent::Status(AvatarStatus::Speaking)));
        assert_eq!(session.status(), AvatarStatus::Listening);
        assert!(!session.transcript().is_turn_active());
    }

    #[test]
    fn test_user_transcript_shows_immediately() {
        let (mut session, _clock, rx) = setup();
        for text in ["Can", " you"] {
            session.handle(ProtocolEvent::TranscriptDelta {
                role: Role::User,
                text: text.into(),
                start_offset: None,
                item_id: None,
                previous_item_id: None,
            });
        }
        session.handle(ProtocolEvent::TranscriptDone { role: Role::User, text: "Can you".into(), interrupted: false });

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(subtitles(&events, Role::User), vec!["Can".to_string(), "Can you".to_string()]);
        assert_eq!(finals(&events), vec![(Role::User, "Can you".to_string())]);
    }

    #[test]
    fn test_interrupt_scheduled_until_cutoff() {
        let (mut session, clock, rx) = setup();
        session.handle(audio_start("t1", "s1"));
        for (text, offset) in [("Hello", 0.0), (" there", 300.0), (" my", 600.0), (" friend", 900.0)] {
            session.handle(assistant(text, offset));
        }
        for i in 0..20 {
            session.handle(sync_frame("s1", i));
        }
        session.tick();
        run(&mut session, &clock, 10, 20.0);

        // msPlayed is 200: the stop waits another 300ms
        session.handle(ProtocolEvent::Interrupt { turn_id: "t1".into(), offset_ms: 500.0 });
        assert!(!session.engine().is_stopped());
        assert!(session.has_pending_stop());
        assert!(finals(&rx.try_iter().collect::<Vec<_>>()).is_empty());

        run(&mut session, &clock, 20, 20.0);
        assert!(session.engine().is_stopped());
        assert!(!session.has_pending_stop());

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(finals(&events), vec![(Role::Assistant, "Hello there".to_string())]);
        assert_eq!(subtitles(&events, Role::Assistant).last().map(String::as_str), Some(""));
        assert!(!events.contains(&SyncEvent::PlaybackEnded));
        assert_eq!(session.status(), AvatarStatus::Listening);
    }

    #[test]
    fn test_interrupt_past_cutoff_stops_immediately() {
        let (mut session, clock, rx) = setup();
        session.handle(audio_start("t1", "s1"));
        for (text, offset) in [("Hello", 0.0), (" there", 150.0), (" you", 450.0)] {
            session.handle(assistant(text, offset));
        }
        for i in 0..10 {
            session.handle(sync_frame("s1", i));
        }
        session.tick();
        run(&mut session, &clock, 10, 20.0);

        session.handle(ProtocolEvent::Interrupt { turn_id: "t1".into(), offset_ms: 100.0 });
        assert!(session.engine().is_stopped());
        session.handle(done("Hello there you"));

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(finals(&events), vec![(Role::Assistant, "Hello there".to_string())]);
    }

    #[test]
    fn test_foreign_turn_interrupt_is_ignored() {
        let (mut session, clock, rx) = setup();
        session.handle(audio_start("B", "s1"));
        for i in 0..5 {
            session.handle(sync_frame("s1", i));
        }
        session.tick();
        run(&mut session, &clock, 5, 20.0);
        let _ = rx.try_iter().count();

        session.handle(ProtocolEvent::Interrupt { turn_id: "A".into(), offset_ms: 0.0 });
        assert!(!session.engine().is_stopped());
        assert!(!session.has_pending_stop());
        assert!(!session.transcript().is_interrupted());
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_new_turn_cancels_pending_stop() {
        let (mut session, clock, rx) = setup();
        session.handle(audio_start("t1", "s1"));
        session.handle(assistant("First", 0.0));
        for i in 0..5 {
            session.handle(sync_frame("s1", i));
        }
        session.tick();
        session.handle(ProtocolEvent::Interrupt { turn_id: "t1".into(), offset_ms: 2000.0 });
        assert!(session.has_pending_stop());

        session.handle(audio_start("t2", "s2"));
        assert!(!session.has_pending_stop());
        for i in 0..5 {
            session.handle(sync_frame("s2", i));
        }
        run(&mut session, &clock, 10, 250.0);
        assert!(!session.engine().is_stopped());

        // The replaced turn is closed with what it had displayed
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(finals(&events).first(), Some(&(Role::Assistant, "First".to_string())));
    }

    #[test]
    fn test_early_delta_after_interrupt_reaches_next_turn() {
        let (mut session, clock, rx) = setup();
        session.handle(audio_start("t1", "s1"));
        for i in 0..5 {
            session.handle(sync_frame("s1", i));
        }
        session.tick();
        run(&mut session, &clock, 3, 20.0);
        session.handle(ProtocolEvent::Interrupt { turn_id: "t1".into(), offset_ms: 0.0 });
        assert!(session.engine().is_stopped());

        // The next reply starts streaming text before its audio
        session.handle(assistant("Next", 0.0));
        assert_eq!(session.transcript().pending_early(), 1);

        session.handle(audio_start("t2", "s2"));
        assert_eq!(session.transcript().display_text(), "Next");
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(subtitles(&events, Role::Assistant).last().map(String::as_str), Some("Next"));
    }

    #[test]
    fn test_turn_ends_when_audio_drains_without_audio_end() {
        let (mut session, clock, rx) = setup();
        session.handle(audio_start("t1", "s1"));
        session.handle(assistant("Short", 0.0));
        for i in 0..3 {
            session.handle(sync_frame("s1", i));
        }
        session.handle(done("Short"));

        session.tick();
        run(&mut session, &clock, 30, 16.0);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.iter().filter(|e| **e == SyncEvent::PlaybackEnded).count(), 1);
        assert_eq!(finals(&events), vec![(Role::Assistant, "Short".to_string())]);
        assert_eq!(session.status(), AvatarStatus::Listening);
    }

    #[test]
    fn test_empty_turn_ends_on_audio_end() {
        let (mut session, _clock, rx) = setup();
        session.handle(audio_start("t1", "s1"));
        session.handle(ProtocolEvent::AudioEnd { session_id: Some("s1".into()) });
        session.handle(done("Okay."));

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.iter().filter(|e| **e == SyncEvent::PlaybackEnded).count(), 1);
        assert_eq!(finals(&events), vec![(Role::Assistant, "Okay.".to_string())]);
        assert_eq!(session.status(), AvatarStatus::Listening);
    }

    #[test]
    fn test_stale_audio_end_ignored() {
        let (mut session, _clock, rx) = setup();
        session.handle(audio_start("t2", "s2"));
        session.handle(ProtocolEvent::AudioEnd { session_id: Some("s1".into()) });
        assert!(!rx.try_iter().any(|e| e == SyncEvent::PlaybackEnded));
    }

    #[test]
    fn test_bad_frame_is_dropped() {
        let (mut session, _clock, _rx) = setup();
        session.handle(audio_start("t1", "s1"));
        session.handle(ProtocolEvent::SyncFrame {
            audio: "not base64!".into(),
            weights: WireWeights::Positional(vec![0.0; 52]),
            frame_index: 0,
            session_id: Some("s1".into()),
            timestamp: None,
        });
        assert_eq!(session.engine().state().queued_frames, 0);
        assert!(session.handle_json("{\"type\":\"bogus\"}").is_err());
    }

    #[test]
    fn test_discrete_blendshapes_drive_status() {
        let (mut session, clock, rx) = setup();
        let mut values = vec![0.0; 52];
        values[Blendshape::JawOpen.index()] = 0.6;
        for _ in 0..2 {
            session.handle(ProtocolEvent::BlendshapeFrame {
                weights: WireWeights::Positional(values.clone()),
                timestamp: None,
            });
        }
        session.tick();
        assert_eq!(session.status(), AvatarStatus::Speaking);

        session.handle(ProtocolEvent::BlendshapeEnd);
        run(&mut session, &clock, 10, 50.0);
        assert_eq!(session.status(), AvatarStatus::Listening);

        let weights: Vec<Weights> = rx
            .try_iter()
            .filter_map(|e| match e {
                SyncEvent::Weights(w) => Some(w),
                _ => None,
            })
            .collect();
        assert_eq!(weights.first().map(|w| w.get(Blendshape::JawOpen)), Some(0.6));
        assert_eq!(weights.last(), Some(&Weights::NEUTRAL));
    }
}

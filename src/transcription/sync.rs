use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;

use crate::events::Role;

use super::text::{join_words, tokens};

/// A fragment as received from the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptDelta {
    pub role: Role,
    pub text: String,
    /// Cumulative server offset in ms; `None` means "due now".
    pub start_offset_ms: Option<f64>,
    pub item_id: Option<String>,
    pub previous_item_id: Option<String>,
}

/// A fragment waiting for playback to reach its turn-relative offset.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptQueueItem {
    pub text: String,
    pub offset_ms: f64,
    pub role: Role,
    pub item_id: Option<String>,
    pub previous_item_id: Option<String>,
}

/// A word that has been displayed, with the offset of the fragment it came in.
#[derive(Debug, Clone, PartialEq)]
pub struct SpokenWord {
    pub text: String,
    pub offset_ms: f64,
}

/// Text released for display.
#[derive(Debug, Clone, PartialEq)]
pub struct Released {
    pub role: Role,
    pub text: String,
    pub offset_ms: f64,
}

/// Result of handing a fragment to the synchronizer.
#[derive(Debug, Default, PartialEq)]
pub struct PushOutcome {
    /// Fragment texts that entered the turn, in reassembled order.
    pub accepted: Vec<String>,
    /// Fragments that are already due.
    pub released: Vec<Released>,
}

impl PushOutcome {
    fn extend(&mut self, other: PushOutcome) {
        self.accepted.extend(other.accepted);
        self.released.extend(other.released);
    }
}

#[derive(Default)]
pub struct TranscriptSync {
    turn_active: bool,
    interrupted: bool,
    /// After an interrupt, nothing at or past this offset is released.
    release_limit: Option<f64>,
    base_offset: Option<f64>,
    queue: VecDeque<TranscriptQueueItem>,
    /// Fragments that arrived before the turn started.
    early: Vec<TranscriptDelta>,
    /// Fragments waiting for the item they follow, keyed by that item's id.
    parked: HashMap<String, Vec<TranscriptDelta>>,
    parked_count: usize,
    seen_items: HashSet<String>,
    spoken: Vec<SpokenWord>,
    display: String,
}

impl TranscriptSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets per-turn state and hands back fragments that arrived early, for the
    /// caller to push again now that the turn exists.
    pub fn begin_turn(&mut self) -> Vec<TranscriptDelta> {
        self.turn_active = true;
        self.interrupted = false;
        self.release_limit = None;
        self.base_offset = None;
        self.queue.clear();
        self.parked.clear();
        self.parked_count = 0;
        self.spoken.clear();
        self.display.clear();
        std::mem::take(&mut self.early)
    }

    pub fn end_turn(&mut self) {
        self.turn_active = false;
    }

    pub fn is_turn_active(&self) -> bool {
        self.turn_active
    }

    /// Stops text at or past `release_limit_ms` from ever being released, and
    /// refuses new fragments for this turn.
    pub fn mark_interrupted(&mut self, release_limit_ms: f64) {
        self.interrupted = true;
        self.release_limit = Some(release_limit_ms);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn display_text(&self) -> &str {
        &self.display
    }

    pub fn spoken_words(&self) -> &[SpokenWord] {
        &self.spoken
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_early(&self) -> usize {
        self.early.len()
    }

    pub fn parked(&self) -> usize {
        self.parked_count
    }

    pub fn push(&mut self, delta: TranscriptDelta) -> PushOutcome {
        if !self.turn_active {
            debug!("Buffering transcript fragment until the turn starts");
            self.early.push(delta);
            return PushOutcome::default();
        }
        if self.interrupted {
            debug!("Dropping transcript fragment after interrupt: {:?}", delta.text);
            return PushOutcome::default();
        }

        if let Some(previous) = &delta.previous_item_id {
            if !self.seen_items.contains(previous) {
                debug!("Parking fragment until item {} arrives", previous);
                self.parked.entry(previous.clone()).or_default().push(delta);
                self.parked_count += 1;
                return PushOutcome::default();
            }
        }

        let mut outcome = PushOutcome::default();
        let mut ready = VecDeque::from([delta]);
        while let Some(delta) = ready.pop_front() {
            if let Some(id) = &delta.item_id {
                if self.seen_items.insert(id.clone()) {
                    if let Some(followers) = self.parked.remove(id) {
                        self.parked_count -= followers.len();
                        ready.extend(followers);
                    }
                }
            }
            outcome.extend(self.accept(delta));
        }
        outcome
    }

    /// Releases every queued fragment that is due. Nothing moves unless the
    /// clock is actually running.
    pub fn drain(&mut self, is_playing: bool, playback_ms: f64) -> Vec<Released> {
        if !is_playing {
            return Vec::new();
        }
        let limit = self.release_limit.unwrap_or(f64::INFINITY);
        let mut released = Vec::new();
        while let Some(front) = self.queue.front() {
            if front.offset_ms >= limit {
                // Past the interrupt cutoff: never spoken
                self.queue.clear();
                break;
            }
            if front.offset_ms > playback_ms {
                break;
            }
            if let Some(item) = self.queue.pop_front() {
                released.push(self.release(item.role, item.text, item.offset_ms));
            }
        }
        released
    }

    /// Releases everything still held, in order (end of playback).
    pub fn flush(&mut self) -> PushOutcome {
        let mut outcome = PushOutcome::default();
        if self.interrupted {
            return outcome;
        }
        // Followers of an item that never arrived go out in offset order
        let mut orphans: Vec<TranscriptDelta> = self.parked.drain().flat_map(|(_, v)| v).collect();
        self.parked_count = 0;
        orphans.sort_by(|a, b| {
            let a = a.start_offset_ms.unwrap_or(f64::MAX);
            let b = b.start_offset_ms.unwrap_or(f64::MAX);
            a.total_cmp(&b)
        });
        for delta in orphans {
            outcome.extend(self.accept(delta));
        }
        while let Some(item) = self.queue.pop_front() {
            outcome.released.push(self.release(item.role, item.text, item.offset_ms));
        }
        outcome
    }

    /// Drops everything not yet displayed and cuts the displayed text back to the
    /// words that started before `cutoff_ms + tolerance_ms`.
    pub fn truncate(&mut self, cutoff_ms: f64, tolerance_ms: f64) -> &str {
        self.mark_interrupted(cutoff_ms + tolerance_ms);
        self.queue.clear();
        self.early.clear();
        self.parked.clear();
        self.parked_count = 0;

        let kept = spoken_before(&self.spoken, cutoff_ms, tolerance_ms);
        if kept.len() == self.spoken.len() {
            return &self.display;
        }
        self.display = if kept.is_empty() {
            String::new()
        } else {
            join_words(&kept.iter().map(|w| w.text.as_str()).collect::<Vec<_>>())
        };
        let kept_len = kept.len();
        self.spoken.truncate(kept_len);
        &self.display
    }

    fn accept(&mut self, delta: TranscriptDelta) -> PushOutcome {
        let raw = delta.start_offset_ms.unwrap_or_else(|| self.base_offset.unwrap_or(0.0));
        let base = *self.base_offset.get_or_insert(raw);
        let mut offset = raw - base;

        let mut outcome = PushOutcome {
            accepted: vec![delta.text.clone()],
            released: Vec::new(),
        };

        if offset <= 0.0 && self.queue.is_empty() {
            outcome.released.push(self.release(delta.role, delta.text, offset.max(0.0)));
            return outcome;
        }

        // Keep the queue time-ordered so draining can stop at the first future item
        if let Some(back) = self.queue.back() {
            if offset < back.offset_ms {
                debug!("Out-of-order transcript offset {} < {}, holding order", offset, back.offset_ms);
                offset = back.offset_ms;
            }
        }
        self.queue.push_back(TranscriptQueueItem {
            text: delta.text,
            offset_ms: offset,
            role: delta.role,
            item_id: delta.item_id,
            previous_item_id: delta.previous_item_id,
        });
        outcome
    }

    fn release(&mut self, role: Role, text: String, offset_ms: f64) -> Released {
        for word in tokens(&text) {
            self.spoken.push(SpokenWord { text: word.to_string(), offset_ms });
        }
        self.display.push_str(&text);
        Released { role, text, offset_ms }
    }
}

/// Words that count as spoken when playback is cut at `cutoff_ms`: those that
/// started before `cutoff_ms + tolerance_ms`. Words are in display order, so
/// the result is always a prefix.
pub fn spoken_before(words: &[SpokenWord], cutoff_ms: f64, tolerance_ms: f64) -> &[SpokenWord] {
    let limit = cutoff_ms + tolerance_ms;
    let end = words.iter().position(|w| w.offset_ms >= limit).unwrap_or(words.len());
    &words[..end]
}

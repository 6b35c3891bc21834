use std::collections::VecDeque;

use crate::config::SubtitleConfig;

use super::text::{ends_sentence, is_pure_punctuation, join_words, tokens};

/// `current` is the line on screen, `pending` holds what comes next. A line
/// locks once long enough and either over budget or at a sentence end; new
/// words then wait until every word of it has been spoken.
pub struct SubtitleChunker {
    config: SubtitleConfig,
    current: Vec<String>,
    locked: bool,
    pending: VecDeque<String>,
    spoken: usize,
    shown: Option<String>,
}

impl SubtitleChunker {
    pub fn new(config: SubtitleConfig) -> Self {
        Self {
            config,
            current: Vec::new(),
            locked: false,
            pending: VecDeque::new(),
            spoken: 0,
            shown: None,
        }
    }

    /// Buffers the words of a fragment. Returns the line to show if it changed.
    pub fn push_text(&mut self, text: &str) -> Option<String> {
        for token in tokens(text) {
            self.push_token(token);
        }
        if !self.locked {
            self.fill_current();
        }
        self.refresh()
    }

    /// Counts the words of a released fragment as spoken. Returns the next line
    /// once the locked one has been fully spoken.
    pub fn words_spoken(&mut self, text: &str) -> Option<String> {
        let count = tokens(text).filter(|t| !is_pure_punctuation(t)).count();
        if count == 0 {
            return None;
        }
        self.spoken += count;

        let mut changed = false;
        while self.locked && self.spoken >= self.current.len() {
            self.spoken -= self.current.len();
            self.current.clear();
            self.locked = false;
            self.fill_current();
            changed = true;
            if self.current.is_empty() {
                self.spoken = 0;
                break;
            }
        }
        if changed {
            self.refresh()
        } else {
            None
        }
    }

    /// Everything still buffered as one final line; clears all state.
    pub fn finish(&mut self) -> Option<String> {
        let mut words = std::mem::take(&mut self.current);
        words.extend(self.pending.drain(..));
        self.reset();
        let line = join_words(&words);
        (!line.is_empty()).then_some(line)
    }

    pub fn reset(&mut self) {
        self.current.clear();
        self.pending.clear();
        self.locked = false;
        self.spoken = 0;
        self.shown = None;
    }

    pub fn current_line(&self) -> String {
        join_words(&self.current)
    }

    fn push_token(&mut self, token: &str) {
        // Trailing punctuation belongs to the word already on screen
        if is_pure_punctuation(token) && self.pending.is_empty() {
            if let Some(last) = self.current.last_mut() {
                last.push_str(token);
                if !self.locked {
                    self.locked = self.is_complete();
                }
                return;
            }
        }
        self.pending.push_back(token.to_string());
    }

    fn fill_current(&mut self) {
        while !self.locked {
            let Some(mut word) = self.pending.pop_front() else {
                break;
            };
            while self.pending.front().map_or(false, |t| is_pure_punctuation(t)) {
                if let Some(punct) = self.pending.pop_front() {
                    word.push_str(&punct);
                }
            }
            self.current.push(word);
            self.locked = self.is_complete();
        }
    }

    fn is_complete(&self) -> bool {
        let chars = join_words(&self.current).chars().count();
        let long_enough = self.current.len() >= self.config.min_words && chars >= self.config.min_chars;
        let ends = self.current.last().map_or(false, |w| ends_sentence(w));
        long_enough && (chars >= self.config.max_chars || ends)
    }

    fn refresh(&mut self) -> Option<String> {
        if self.current.is_empty() {
            return None;
        }
        let line = join_words(&self.current);
        if self.shown.as_deref() == Some(line.as_str()) {
            return None;
        }
        self.shown = Some(line.clone());
        Some(line)
    }
}

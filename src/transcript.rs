//! Bounded transcript log for the live session UI.
//!
//! Transcription fragments stream in per speaker. Consecutive fragments
//! from the same speaker are one utterance and merge into a single logical
//! line; a speaker change starts a new line. Only the most recent lines are
//! kept: this is display history, not a record.

use std::collections::VecDeque;

use serde::Serialize;

/// Maximum number of logical lines kept for display.
const MAX_LINES: usize = 5;

/// One logical line: a full utterance by one speaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptLine {
    pub text: String,
    #[serde(rename = "isUser")]
    pub is_user: bool,
}

/// Bounded, merge-on-append transcript history.
#[derive(Debug, Default)]
pub struct TranscriptLog {
    lines: VecDeque<TranscriptLine>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment. Returns the updated logical line, or `None` when
    /// the fragment was blank and dropped.
    pub fn push(&mut self, text: &str, is_user: bool) -> Option<&TranscriptLine> {
        if text.trim().is_empty() {
            return None;
        }

        match self.lines.back_mut() {
            Some(last) if last.is_user == is_user => {
                last.text.push_str(text);
            }
            _ => {
                self.lines.push_back(TranscriptLine {
                    text: text.to_string(),
                    is_user,
                });
                while self.lines.len() > MAX_LINES {
                    self.lines.pop_front();
                }
            }
        }
        self.lines.back()
    }

    /// Current lines, oldest first.
    pub fn lines(&self) -> impl Iterator<Item = &TranscriptLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Drop all lines. The next conversation starts with a blank window.
    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

//! **Transcript Store** — the ordered, role-tagged turns of one practice session.
//!
//! Append-only, except that the trailing assistant turn grows in place while its
//! response streams in. At most one turn is in progress at a time, and it is
//! always the last one.

use crate::error::TranscriptError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Who spoke a turn. Serialized as the chat-completion role (`user` / `assistant`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// One role-tagged message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(rename = "role")]
    pub speaker: Speaker,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered sequence of turns; the single source of truth rendered by the UI.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
    in_progress: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Whether the trailing assistant turn is still being extended.
    pub fn is_streaming(&self) -> bool {
        self.in_progress
    }

    /// Append a user turn. Returns `false` (and changes nothing) when the text is
    /// blank after trimming. A user turn supersedes any in-progress assistant turn.
    pub fn append_user(&mut self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        self.in_progress = false;
        self.turns.push(Turn::user(text));
        true
    }

    /// Append an empty assistant turn that streamed deltas will extend.
    pub fn append_assistant_placeholder(&mut self) -> Result<(), TranscriptError> {
        if self.in_progress {
            return Err(TranscriptError::TurnInProgress);
        }
        self.turns.push(Turn::assistant(String::new()));
        self.in_progress = true;
        Ok(())
    }

    /// Append `delta` to the content of the last turn, which must be an assistant turn.
    pub fn extend_last_assistant(&mut self, delta: &str) -> Result<(), TranscriptError> {
        let last = self.last_assistant_mut()?;
        last.content.push_str(delta);
        Ok(())
    }

    /// Overwrite the content of the last assistant turn (fallback message on failure).
    pub fn replace_last_assistant(&mut self, text: &str) -> Result<(), TranscriptError> {
        let last = self.last_assistant_mut()?;
        last.content.clear();
        last.content.push_str(text);
        Ok(())
    }

    /// Mark the trailing assistant turn as finished; it is immutable from here on.
    pub fn complete_assistant(&mut self) {
        self.in_progress = false;
    }

    /// Turns to send upstream: everything except an in-progress placeholder.
    pub fn request_turns(&self) -> &[Turn] {
        if self.in_progress {
            &self.turns[..self.turns.len() - 1]
        } else {
            &self.turns
        }
    }

    fn last_assistant_mut(&mut self) -> Result<&mut Turn, TranscriptError> {
        match self.turns.last_mut() {
            Some(turn) if turn.speaker == Speaker::Assistant => Ok(turn),
            _ => Err(TranscriptError::NoAssistantTurn),
        }
    }
}

/// Receives decoded text deltas, in stream order.
pub trait DeltaSink {
    fn append_delta(&mut self, delta: &str);
}

impl DeltaSink for Transcript {
    fn append_delta(&mut self, delta: &str) {
        if let Err(e) = self.extend_last_assistant(delta) {
            warn!("Transcript: dropping delta: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_concatenate_in_call_order() {
        let mut t = Transcript::new();
        t.append_user("hi");
        t.append_assistant_placeholder().unwrap();
        for d in ["Great ", "point", "", "! Tell me ", "more."] {
            t.extend_last_assistant(d).unwrap();
        }
        assert_eq!(t.last().unwrap().content, "Great point! Tell me more.");
        assert!(t.is_streaming());
    }

    #[test]
    fn blank_user_text_is_ignored() {
        let mut t = Transcript::new();
        assert!(!t.append_user("   \n\t"));
        assert!(t.is_empty());
        assert!(t.append_user("  yes  "));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn only_one_turn_in_progress() {
        let mut t = Transcript::new();
        t.append_assistant_placeholder().unwrap();
        assert_eq!(
            t.append_assistant_placeholder(),
            Err(TranscriptError::TurnInProgress)
        );
        t.complete_assistant();
        assert!(t.append_assistant_placeholder().is_ok());
    }

    #[test]
    fn extend_requires_trailing_assistant() {
        let mut t = Transcript::new();
        assert_eq!(t.extend_last_assistant("x"), Err(TranscriptError::NoAssistantTurn));
        t.append_user("hello");
        assert_eq!(t.replace_last_assistant("x"), Err(TranscriptError::NoAssistantTurn));
    }

    #[test]
    fn replace_overwrites_partial_text() {
        let mut t = Transcript::new();
        t.append_user("hello");
        t.append_assistant_placeholder().unwrap();
        t.extend_last_assistant("half an ans").unwrap();
        t.replace_last_assistant("sorry").unwrap();
        assert_eq!(t.turns()[1], Turn::assistant("sorry"));
    }

    #[test]
    fn request_turns_exclude_placeholder() {
        let mut t = Transcript::new();
        t.append_user("hello");
        t.append_assistant_placeholder().unwrap();
        assert_eq!(t.request_turns(), &[Turn::user("hello")]);
        t.complete_assistant();
        assert_eq!(t.request_turns().len(), 2);
    }

    #[test]
    fn turn_serializes_with_chat_role() {
        let json = serde_json::to_value(Turn::assistant("ok")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "ok"}));
    }
}

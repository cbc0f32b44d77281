//! Turns streamed transcript fragments into chat entries
//!
//! Each speaker has at most one open entry per turn. Fragments extend the
//! speaker's accumulated text and the open entry always mirrors it; a turn
//! boundary freezes the open entries and starts fresh accumulators.

use super::types::{ChatMessage, Speaker};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct TranscriptAssembler {
    messages: Vec<ChatMessage>,
    user_turn: String,
    assistant_turn: String,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the speaker's current turn with a fragment
    pub fn append_fragment(&mut self, speaker: Speaker, text: &str) {
        let accumulated = match speaker {
            Speaker::User => &mut self.user_turn,
            Speaker::Assistant => &mut self.assistant_turn,
        };
        accumulated.push_str(text);
        let accumulated = accumulated.clone();

        // The open entry is not always last once both speakers interleave
        match self
            .messages
            .iter()
            .rposition(|m| m.speaker == speaker && m.is_open())
        {
            Some(index) => self.messages[index].text = accumulated,
            None => {
                debug!("Opening {:?} transcript entry", speaker);
                self.messages.push(ChatMessage::new(speaker, accumulated));
            }
        }
    }

    /// Close the current turn for both speakers
    pub fn finalize_turn(&mut self) {
        for message in self.messages.iter_mut().filter(|m| m.is_open()) {
            message.is_final = true;
        }
        self.user_turn.clear();
        self.assistant_turn.clear();
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The speaker's entry that is still being written, if any
    pub fn open_entry(&self, speaker: Speaker) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.speaker == speaker && m.is_open())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

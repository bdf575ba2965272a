//! In-memory transcript mirror.
//!
//! The transcript mirrors the persisted message log plus at most one
//! unsaved streaming tail entry. The tail has no id until the reply is
//! persisted and promoted.

use crate::ai::types::Role;
use crate::storage::Message;

/// One transcript entry. `id` is None only for the streaming tail.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub id: Option<i64>,
    pub role: Role,
    pub content: String,
}

impl TranscriptEntry {
    fn from_message(message: &Message) -> Self {
        Self {
            id: Some(message.id),
            role: message.role,
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole transcript with persisted history.
    pub fn hydrate(&mut self, messages: &[Message]) {
        self.entries = messages.iter().map(TranscriptEntry::from_message).collect();
    }

    /// Appends a persisted message, skipping ids already present.
    pub fn push_persisted(&mut self, message: &Message) {
        if self.entries.iter().any(|e| e.id == Some(message.id)) {
            return;
        }
        self.entries.push(TranscriptEntry::from_message(message));
    }

    /// Overwrites the streaming tail with the accumulated reply so far.
    ///
    /// Only an unsaved assistant entry is ever overwritten. Anything else
    /// at the tail means there is no streaming slot yet, so one is
    /// appended instead of clobbering persisted history.
    pub fn replace_streaming_tail(&mut self, content: &str) {
        match self.entries.last_mut() {
            Some(tail) if tail.id.is_none() && tail.role == Role::Assistant => {
                tail.content = content.to_string();
            }
            _ => self.entries.push(TranscriptEntry {
                id: None,
                role: Role::Assistant,
                content: content.to_string(),
            }),
        }
    }

    /// Swaps the streaming tail for its persisted form.
    pub fn promote_streaming_tail(&mut self, message: &Message) {
        match self.entries.last_mut() {
            Some(tail) if tail.id.is_none() && tail.role == Role::Assistant => {
                *tail = TranscriptEntry::from_message(message);
            }
            _ => self.push_persisted(message),
        }
    }

    /// Drops the streaming tail, e.g. after a mid-stream failure.
    pub fn discard_streaming_tail(&mut self) {
        if matches!(
            self.entries.last(),
            Some(tail) if tail.id.is_none() && tail.role == Role::Assistant
        ) {
            self.entries.pop();
        }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

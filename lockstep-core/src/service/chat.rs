use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::{Error, Result};
use crate::models::{ChatMessage, Participant, RoomId, RoomLogEntry};

/// Per-room chat sequencer: stamps accepted messages with a strictly
/// increasing, gap-free sequence number. Rejected messages consume no
/// number. Lives inside the room's serialization point, so concurrent
/// posts are ordered by lock acquisition.
#[derive(Debug)]
pub struct ChatSequencer {
    next_sequence: u64,
    max_length: usize,
}

impl ChatSequencer {
    #[must_use]
    pub const fn new(max_length: usize) -> Self {
        Self {
            next_sequence: 1,
            max_length,
        }
    }

    /// Validate and sequence one message from a seated participant.
    pub fn sequence(
        &mut self,
        room_id: RoomId,
        author: &Participant,
        text: String,
        now: DateTime<Utc>,
    ) -> Result<ChatMessage> {
        if text.trim().is_empty() {
            return Err(Error::TooLong(format!(
                "blank message, accepted length is 1..={}",
                self.max_length
            )));
        }
        let length = text.chars().count();
        if length > self.max_length {
            return Err(Error::TooLong(format!(
                "message length {length} exceeds limit {}",
                self.max_length
            )));
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let message = ChatMessage::new(
            room_id,
            author.id.clone(),
            author.display_name.clone(),
            text,
            sequence,
            now,
        );

        info!(
            room_id = message.room_id.as_str(),
            author_id = message.author_id.as_str(),
            message_id = %message.id,
            sequence = message.sequence,
            "Chat message sequenced"
        );

        Ok(message)
    }
}

/// Most recent chat messages from the room log, oldest first, capped at
/// `limit`. Replayed to late joiners for catch-up.
#[must_use]
pub fn chat_backlog(log: &[RoomLogEntry], limit: usize) -> Vec<ChatMessage> {
    let mut recent: Vec<ChatMessage> = log
        .iter()
        .rev()
        .filter_map(|entry| match entry {
            RoomLogEntry::Chat(message) => Some(message.clone()),
            RoomLogEntry::Sync(_) => None,
        })
        .take(limit)
        .collect();
    recent.reverse();
    recent
}

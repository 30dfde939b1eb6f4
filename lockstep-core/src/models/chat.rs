use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{MessageId, ParticipantId, RoomId};

/// One sequenced chat message. Immutable once the sequencer has stamped
/// `sequence`; duplicate suppression on the receiving side keys off `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub author_id: ParticipantId,
    pub author_name: String,
    pub text: String,
    /// Room-scoped, strictly increasing, gap-free across accepted posts.
    pub sequence: u64,
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    #[must_use]
    pub fn new(
        room_id: RoomId,
        author_id: ParticipantId,
        author_name: String,
        text: String,
        sequence: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            room_id,
            author_id,
            author_name,
            text,
            sequence,
            sent_at: now,
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chat::ChatMessage;
use super::id::{ParticipantId, RoomId};
use super::participant::Participant;
use super::playback::{MediaRef, RunState};

/// Kind of a playback event recorded in the room log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventKind {
    Select,
    Play,
    Pause,
    Seek,
    Snapshot,
}

impl SyncEventKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Seek => "seek",
            Self::Snapshot => "snapshot",
        }
    }
}

/// Playback event as recorded in the room log. Immutable once appended;
/// ordered by epoch (snapshots repeat the epoch they observed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    pub kind: SyncEventKind,
    /// Originating participant; `None` for engine-emitted snapshots.
    pub participant_id: Option<ParticipantId>,
    pub position: f64,
    pub epoch: u64,
    pub timestamp: DateTime<Utc>,
}

/// One entry of the per-room append-only log: the deterministic
/// interleave of playback history and chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum RoomLogEntry {
    Sync(SyncEvent),
    Chat(ChatMessage),
}

/// Events broadcast to every subscribed connection of a room.
///
/// Serialized with a `type` tag so the gateway can encode them onto the
/// wire without translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    /// A participant entered the room.
    ParticipantJoined {
        room_id: RoomId,
        participant: Participant,
        participant_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A participant left, timed out, or was evicted. Carries the promoted
    /// host when the departure triggered a handoff.
    ParticipantLeft {
        room_id: RoomId,
        participant_id: ParticipantId,
        new_host: Option<ParticipantId>,
        timestamp: DateTime<Utc>,
    },

    /// The room closed; no further intents are accepted.
    RoomClosed {
        room_id: RoomId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The media to watch was selected or replaced.
    MediaSelected {
        room_id: RoomId,
        participant_id: ParticipantId,
        media: MediaRef,
        epoch: u64,
        timestamp: DateTime<Utc>,
    },

    /// Playback started from `position`.
    Played {
        room_id: RoomId,
        participant_id: ParticipantId,
        position: f64,
        epoch: u64,
        timestamp: DateTime<Utc>,
    },

    /// Playback paused at `position`.
    Paused {
        room_id: RoomId,
        participant_id: ParticipantId,
        position: f64,
        epoch: u64,
        timestamp: DateTime<Utc>,
    },

    /// Position jumped without a run-state change.
    Sought {
        room_id: RoomId,
        participant_id: ParticipantId,
        position: f64,
        epoch: u64,
        timestamp: DateTime<Utc>,
    },

    /// Periodic computed-position observation for drift correction and
    /// late-join catch-up. Does not advance the epoch.
    Snapshot {
        room_id: RoomId,
        position: f64,
        run_state: RunState,
        epoch: u64,
        timestamp: DateTime<Utc>,
    },

    /// A chat message passed the sequencer.
    MessagePosted { room_id: RoomId, message: ChatMessage },
}

impl RoomEvent {
    /// Room this event belongs to.
    #[must_use]
    pub const fn room_id(&self) -> &RoomId {
        match self {
            Self::ParticipantJoined { room_id, .. }
            | Self::ParticipantLeft { room_id, .. }
            | Self::RoomClosed { room_id, .. }
            | Self::MediaSelected { room_id, .. }
            | Self::Played { room_id, .. }
            | Self::Paused { room_id, .. }
            | Self::Sought { room_id, .. }
            | Self::Snapshot { room_id, .. }
            | Self::MessagePosted { room_id, .. } => room_id,
        }
    }

    /// Epoch carried by playback events; `None` for membership, chat and
    /// lifecycle events.
    #[must_use]
    pub const fn epoch(&self) -> Option<u64> {
        match self {
            Self::MediaSelected { epoch, .. }
            | Self::Played { epoch, .. }
            | Self::Paused { epoch, .. }
            | Self::Sought { epoch, .. }
            | Self::Snapshot { epoch, .. } => Some(*epoch),
            _ => None,
        }
    }

    /// Get a short description of the event type
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::ParticipantJoined { .. } => "participant_joined",
            Self::ParticipantLeft { .. } => "participant_left",
            Self::RoomClosed { .. } => "room_closed",
            Self::MediaSelected { .. } => "media_selected",
            Self::Played { .. } => "played",
            Self::Paused { .. } => "paused",
            Self::Sought { .. } => "sought",
            Self::Snapshot { .. } => "snapshot",
            Self::MessagePosted { .. } => "message_posted",
        }
    }
}

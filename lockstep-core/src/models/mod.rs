pub mod chat;
pub mod event;
pub mod id;
pub mod participant;
pub mod playback;
pub mod room;

pub use chat::ChatMessage;
pub use event::{RoomEvent, RoomLogEntry, SyncEvent, SyncEventKind};
pub use id::{generate_id, MessageId, ParticipantId, RoomId};
pub use participant::{Participant, Seat};
pub use playback::{MediaRef, PlaybackSnapshot, PlaybackState, RunState};
pub use room::{Room, RoomConfig, RoomInfo, RoomLifecycle};

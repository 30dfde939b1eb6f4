use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::ParticipantId;

/// Identity record for one participant, supplied pre-validated by the
/// identity layer. The engine never checks credentials beyond room
/// passwords.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    /// Opaque avatar reference (URL or asset id), resolved by clients.
    pub avatar: Option<String>,
    pub is_anonymous: bool,
}

impl Participant {
    #[must_use]
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: ParticipantId::new(),
            display_name: display_name.into(),
            avatar: None,
            is_anonymous: false,
        }
    }

    #[must_use]
    pub fn anonymous(display_name: impl Into<String>) -> Self {
        Self {
            id: ParticipantId::new(),
            display_name: display_name.into(),
            avatar: None,
            is_anonymous: true,
        }
    }

    #[must_use]
    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }
}

/// Room-side presence record for a participant: who sits in the room,
/// since when, and when they last proved liveness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seat {
    pub participant: Participant,
    pub joined_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl Seat {
    #[must_use]
    pub fn new(participant: Participant, now: DateTime<Utc>) -> Self {
        Self {
            participant,
            joined_at: now,
            last_heartbeat: now,
        }
    }

    /// Renew the heartbeat deadline.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat = now;
    }

    /// Whether the heartbeat is older than `timeout_seconds` at `now`.
    /// Timeouts too large to represent as a deadline never expire.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, timeout_seconds: u64) -> bool {
        i64::try_from(timeout_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|timeout| self.last_heartbeat.checked_add_signed(timeout))
            .is_some_and(|deadline| now > deadline)
    }
}

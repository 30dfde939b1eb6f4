use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{ParticipantId, RoomId};
use crate::error::{Error, Result};

/// Capacity bounds are fixed product rules, not configuration.
pub const MIN_CAPACITY: u32 = 2;
pub const MAX_CAPACITY: u32 = 50;
pub const MAX_NAME_LENGTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoomLifecycle {
    #[default]
    Open,
    Closed,
}

impl RoomLifecycle {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for RoomLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Room creation request as delivered by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub max_participants: u32,
    #[serde(default)]
    pub is_private: bool,
    /// Required iff `is_private`.
    #[serde(default)]
    pub password: Option<String>,
    /// Per-room override of the engine-wide host-only-control policy.
    /// `None` inherits the configured default.
    #[serde(default)]
    pub host_only_control: Option<bool>,
}

impl RoomConfig {
    pub fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(Error::InvalidConfig("room name must not be empty".to_string()));
        }
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(Error::InvalidConfig(format!(
                "room name exceeds {MAX_NAME_LENGTH} characters"
            )));
        }
        if self.max_participants < MIN_CAPACITY || self.max_participants > MAX_CAPACITY {
            return Err(Error::InvalidConfig(format!(
                "max_participants must be between {MIN_CAPACITY} and {MAX_CAPACITY}, got {}",
                self.max_participants
            )));
        }
        match (self.is_private, &self.password) {
            (true, None) => {
                return Err(Error::InvalidConfig(
                    "private rooms require a password".to_string(),
                ));
            }
            (true, Some(p)) if p.is_empty() => {
                return Err(Error::InvalidConfig(
                    "private rooms require a non-empty password".to_string(),
                ));
            }
            (false, Some(_)) => {
                return Err(Error::InvalidConfig(
                    "public rooms must not set a password".to_string(),
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Room descriptor plus the mutable bits owned by the session (host,
/// lifecycle). Lives inside the room's serialization point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub description: Option<String>,
    pub max_participants: u32,
    pub is_private: bool,
    /// Argon2id PHC string; never serialized outward.
    #[serde(skip)]
    pub password_hash: Option<String>,
    pub host_id: ParticipantId,
    pub lifecycle: RoomLifecycle,
    pub host_only_control: bool,
    pub created_at: DateTime<Utc>,
}

impl Room {
    /// Build a room from a validated config. `password_hash` must already
    /// be derived when the config is private.
    #[must_use]
    pub fn from_config(
        config: &RoomConfig,
        host_id: ParticipantId,
        password_hash: Option<String>,
        default_host_only: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RoomId::new(),
            name: config.name.trim().to_string(),
            description: config.description.clone(),
            max_participants: config.max_participants,
            is_private: config.is_private,
            password_hash,
            host_id,
            lifecycle: RoomLifecycle::Open,
            host_only_control: config.host_only_control.unwrap_or(default_host_only),
            created_at: now,
        }
    }
}

/// Lobby-facing room summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub name: String,
    pub description: Option<String>,
    pub participant_count: usize,
    pub max_participants: u32,
    pub is_private: bool,
    pub media_title: Option<String>,
    pub host_id: ParticipantId,
    pub host_name: String,
    pub lifecycle: RoomLifecycle,
    pub created_at: DateTime<Utc>,
}

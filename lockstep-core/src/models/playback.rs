use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Reference to the media item a room watches together.
///
/// Opaque to the engine: `source` may be a URL or a provider-specific id,
/// resolved by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub title: String,
    pub source: String,
}

impl MediaRef {
    #[must_use]
    pub fn new(title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source: source.into(),
        }
    }
}

/// Run state of a room's shared player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No media selected yet.
    Uninitialized,
    Paused,
    Playing,
    /// Room closed; no further transitions accepted.
    Terminated,
}

impl RunState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Paused => "paused",
            Self::Playing => "playing",
            Self::Terminated => "terminated",
        }
    }

    #[must_use]
    pub const fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view of a room's playback, with the position already
/// computed. Returned to joiners and resyncing connections so catch-up
/// never replays event history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub media: Option<MediaRef>,
    pub position: f64,
    pub run_state: RunState,
    pub epoch: u64,
    pub taken_at: DateTime<Utc>,
}

/// Authoritative playback state of one room.
///
/// `position` is the logical position in seconds as recorded at
/// `updated_at`; the live position is always derived through
/// [`position_at`](Self::position_at) so a playing room advances without
/// periodic writes. All mutators take `now` from the caller so the
/// serialization point reads the clock exactly once per intent and events
/// carry timestamps consistent with the state they announce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackState {
    pub media: Option<MediaRef>,
    /// Logical position in seconds, valid at `updated_at`.
    pub position: f64,
    pub run_state: RunState,
    /// Incremented on every accepted control transition. Snapshots carry
    /// the epoch they observed without advancing it.
    pub epoch: u64,
    pub updated_at: DateTime<Utc>,
}

impl PlaybackState {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            media: None,
            position: 0.0,
            run_state: RunState::Uninitialized,
            epoch: 0,
            updated_at: now,
        }
    }

    /// Computed position at `now`: frozen while paused, advancing with
    /// wall-clock time while playing.
    #[must_use]
    pub fn position_at(&self, now: DateTime<Utc>) -> f64 {
        if self.run_state.is_playing() {
            let elapsed = (now - self.updated_at).num_milliseconds() as f64 / 1000.0;
            self.position + elapsed.max(0.0)
        } else {
            self.position
        }
    }

    /// Capture a snapshot with the position computed at `now`.
    pub fn snapshot(&self, now: DateTime<Utc>) -> PlaybackSnapshot {
        PlaybackSnapshot {
            media: self.media.clone(),
            position: self.position_at(now),
            run_state: self.run_state,
            epoch: self.epoch,
            taken_at: now,
        }
    }

    /// Select the media to watch. Allowed from `Uninitialized` or `Paused`;
    /// resets the position to 0 and lands in `Paused`.
    pub fn select_media(&mut self, media: MediaRef, now: DateTime<Utc>) -> Result<()> {
        match self.run_state {
            RunState::Uninitialized | RunState::Paused => {
                self.media = Some(media);
                self.position = 0.0;
                self.run_state = RunState::Paused;
                self.epoch += 1;
                self.updated_at = now;
                Ok(())
            }
            other => Err(Error::InvalidState(format!(
                "cannot select media while {other}"
            ))),
        }
    }

    /// Start playing from `at_position`. Allowed from `Paused`.
    pub fn play(&mut self, at_position: f64, now: DateTime<Utc>) -> Result<()> {
        check_position(at_position)?;
        if self.run_state != RunState::Paused {
            return Err(Error::InvalidState(format!(
                "cannot play while {}",
                self.run_state
            )));
        }
        self.position = at_position;
        self.run_state = RunState::Playing;
        self.epoch += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Pause at `at_position`. Allowed from `Playing`.
    pub fn pause(&mut self, at_position: f64, now: DateTime<Utc>) -> Result<()> {
        check_position(at_position)?;
        if self.run_state != RunState::Playing {
            return Err(Error::InvalidState(format!(
                "cannot pause while {}",
                self.run_state
            )));
        }
        self.position = at_position;
        self.run_state = RunState::Paused;
        self.epoch += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Jump to `to_position` without changing the run state. Allowed from
    /// `Paused` or `Playing`.
    pub fn seek(&mut self, to_position: f64, now: DateTime<Utc>) -> Result<()> {
        check_position(to_position)?;
        if !matches!(self.run_state, RunState::Paused | RunState::Playing) {
            return Err(Error::InvalidState(format!(
                "cannot seek while {}",
                self.run_state
            )));
        }
        self.position = to_position;
        self.epoch += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Freeze the state machine when the room closes. The position is
    /// pinned at its computed value; the epoch is left untouched.
    pub fn terminate(&mut self, now: DateTime<Utc>) {
        self.position = self.position_at(now);
        self.run_state = RunState::Terminated;
        self.updated_at = now;
    }
}

fn check_position(position: f64) -> Result<()> {
    if !position.is_finite() || position < 0.0 {
        return Err(Error::InvalidState(format!(
            "position {position} is not a valid playback position"
        )));
    }
    Ok(())
}

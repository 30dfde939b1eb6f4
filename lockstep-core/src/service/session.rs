//! Per-room session: the serialization point every intent passes through.
//!
//! All room state sits behind one mutex. An intent locks, validates,
//! mutates, appends to the room log and broadcasts while still holding the
//! lock, so every subscriber observes the same total order the log records.
//! Broadcasts go through unbounded senders and never block, which keeps the
//! critical section short.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{
    ChatMessage, MediaRef, Participant, ParticipantId, PlaybackSnapshot, PlaybackState, Room,
    RoomEvent, RoomId, RoomInfo, RoomLifecycle, RoomLogEntry, RunState, SyncEvent, SyncEventKind,
};

use super::chat::{chat_backlog, ChatSequencer};
use super::hub::EventHub;
use super::presence::PresenceLedger;

/// Everything a joiner needs to render the room without replaying history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResult {
    pub room: RoomInfo,
    pub snapshot: PlaybackSnapshot,
    pub backlog: Vec<ChatMessage>,
    /// Current roster in join order; the first entry is the host.
    pub roster: Vec<Participant>,
}

/// Outcome of a departure. `leave` is idempotent, so `removed` tells the
/// caller whether anything actually happened.
#[derive(Debug, Clone)]
pub struct LeaveOutcome {
    pub removed: bool,
    pub new_host: Option<ParticipantId>,
    /// True when this departure emptied the room; the registry schedules
    /// the grace-period closure off this flag.
    pub room_empty: bool,
    /// Emptiness interval this departure opened, captured under the room
    /// lock for [`RoomSession::close_if_empty`]. Meaningful only when
    /// `room_empty` is set.
    pub(crate) vacancy: u64,
}

impl LeaveOutcome {
    pub(crate) const fn noop() -> Self {
        Self {
            removed: false,
            new_host: None,
            room_empty: false,
            vacancy: 0,
        }
    }
}

struct RoomState {
    room: Room,
    roster: PresenceLedger,
    playback: PlaybackState,
    chat: ChatSequencer,
    /// Append-only interleave of playback events and chat, retained for
    /// the room's lifetime.
    log: Vec<RoomLogEntry>,
    /// Count of times the roster has emptied. A scheduled grace closure
    /// captures the current value; a rejoin that empties the room again
    /// opens a new interval, so the older closure no longer matches and
    /// the full grace period restarts.
    vacancy: u64,
}

/// One live room. Created by the registry, driven by intents and by the
/// registry's per-room timer task.
///
/// Every method takes `now` from the caller: the clock is read once per
/// intent, so state, log entries and broadcast events all carry the same
/// timestamp.
pub struct RoomSession {
    id: RoomId,
    state: Mutex<RoomState>,
    hub: EventHub,
    config: Arc<Config>,
    cancel_token: CancellationToken,
}

impl fmt::Debug for RoomSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomSession")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl RoomSession {
    /// Build a session with the host already seated. No events are
    /// broadcast; nobody can be subscribed yet.
    pub fn new(
        room: Room,
        host: Participant,
        hub: EventHub,
        config: Arc<Config>,
        now: DateTime<Utc>,
    ) -> Arc<Self> {
        let id = room.id.clone();
        let chat = ChatSequencer::new(config.room.chat_max_length);
        let mut roster = PresenceLedger::new();
        roster.insert(host, now);

        let state = RoomState {
            room,
            roster,
            playback: PlaybackState::new(now),
            chat,
            log: Vec::new(),
            vacancy: 0,
        };

        Arc::new(Self {
            id,
            state: Mutex::new(state),
            hub,
            config,
            cancel_token: CancellationToken::new(),
        })
    }

    #[must_use]
    pub const fn id(&self) -> &RoomId {
        &self.id
    }

    /// Token cancelled when the room closes; the timer task selects on it.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.lock().room.lifecycle.is_open()
    }

    /// Whether `participant_id` currently holds a seat.
    #[must_use]
    pub fn is_participant(&self, participant_id: &ParticipantId) -> bool {
        self.state.lock().roster.contains(participant_id)
    }

    /// Current roster in join order; the first entry is the host.
    #[must_use]
    pub fn list_active(&self) -> Vec<Participant> {
        self.state.lock().roster.participants()
    }

    /// Lobby summary of the room.
    #[must_use]
    pub fn info(&self) -> RoomInfo {
        let state = self.state.lock();
        Self::info_locked(&state)
    }

    /// Current playback view, position computed at `now`.
    #[must_use]
    pub fn playback_snapshot(&self, now: DateTime<Utc>) -> PlaybackSnapshot {
        self.state.lock().playback.snapshot(now)
    }

    /// Copy of the append-only room log.
    #[must_use]
    pub fn room_log(&self) -> Vec<RoomLogEntry> {
        self.state.lock().log.clone()
    }

    /// Membership gate shared by `join` and the registry's password check.
    /// Order: lifecycle, duplicate seat, capacity.
    fn check_joinable(state: &RoomState, participant_id: &ParticipantId) -> Result<()> {
        Self::check_open(state)?;
        if state.roster.contains(participant_id) {
            return Err(Error::InvalidState(format!(
                "participant {participant_id} is already in room {}",
                state.room.id
            )));
        }
        if state.roster.len() as u32 >= state.room.max_participants {
            return Err(Error::Full(format!(
                "room {} at capacity {}",
                state.room.id, state.room.max_participants
            )));
        }
        Ok(())
    }

    /// Run the join gate and hand back the password hash for a private
    /// room. The registry verifies the password outside the lock, then
    /// calls [`join`](Self::join), which re-runs the same gate.
    pub(crate) fn join_gate(&self, participant_id: &ParticipantId) -> Result<Option<String>> {
        let state = self.state.lock();
        Self::check_joinable(&state, participant_id)?;
        Ok(state.room.password_hash.clone())
    }

    /// Seat a participant and announce them. An empty room adopts the
    /// joiner as host, which covers rejoining during the empty-room grace
    /// period.
    pub fn join(&self, participant: Participant, now: DateTime<Utc>) -> Result<JoinResult> {
        let mut state = self.state.lock();
        Self::check_joinable(&state, &participant.id)?;

        if state.roster.is_empty() {
            state.room.host_id = participant.id.clone();
        }

        let announced = participant.clone();
        state.roster.insert(participant, now);

        let event = RoomEvent::ParticipantJoined {
            room_id: self.id.clone(),
            participant: announced.clone(),
            participant_count: state.roster.len(),
            timestamp: now,
        };
        self.hub.broadcast(&self.id, &event);

        info!(
            room_id = self.id.as_str(),
            participant_id = announced.id.as_str(),
            participant_count = state.roster.len(),
            "Participant joined room"
        );

        Ok(JoinResult {
            room: Self::info_locked(&state),
            snapshot: state.playback.snapshot(now),
            backlog: chat_backlog(&state.log, self.config.room.chat_backlog_limit),
            roster: state.roster.participants(),
        })
    }

    /// Remove a participant. Idempotent: leaving twice, or leaving a room
    /// already closed, is a no-op.
    pub fn leave(&self, participant_id: &ParticipantId, now: DateTime<Utc>) -> LeaveOutcome {
        let mut state = self.state.lock();
        if state.room.lifecycle.is_closed() {
            return LeaveOutcome::noop();
        }
        let Some(new_host) = self.depart_locked(&mut state, participant_id, now) else {
            return LeaveOutcome::noop();
        };

        info!(
            room_id = self.id.as_str(),
            participant_id = participant_id.as_str(),
            remaining = state.roster.len(),
            "Participant left room"
        );

        let room_empty = state.roster.is_empty();
        if room_empty {
            state.vacancy += 1;
        }

        LeaveOutcome {
            removed: true,
            new_host,
            room_empty,
            vacancy: state.vacancy,
        }
    }

    /// Renew a participant's heartbeat.
    pub fn touch(&self, participant_id: &ParticipantId, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        if state.roster.touch(participant_id, now) {
            Ok(())
        } else {
            Err(Error::NotFound(format!(
                "participant {participant_id} not in room {}",
                self.id
            )))
        }
    }

    /// Select or replace the room's media. Control-gated like the other
    /// playback intents.
    pub fn select_media(
        &self,
        requester: &ParticipantId,
        media: MediaRef,
        now: DateTime<Utc>,
    ) -> Result<PlaybackSnapshot> {
        let mut state = self.state.lock();
        Self::check_control(&state, requester)?;
        state.playback.select_media(media.clone(), now)?;
        let epoch = state.playback.epoch;

        Self::append_sync(&mut state, SyncEventKind::Select, requester, 0.0, epoch, now);
        let event = RoomEvent::MediaSelected {
            room_id: self.id.clone(),
            participant_id: requester.clone(),
            media: media.clone(),
            epoch,
            timestamp: now,
        };
        self.hub.broadcast(&self.id, &event);

        info!(
            room_id = self.id.as_str(),
            participant_id = requester.as_str(),
            title = media.title.as_str(),
            epoch,
            "Media selected"
        );
        Ok(state.playback.snapshot(now))
    }

    /// Start playback from `at_position`.
    pub fn play(
        &self,
        requester: &ParticipantId,
        at_position: f64,
        now: DateTime<Utc>,
    ) -> Result<PlaybackSnapshot> {
        let mut state = self.state.lock();
        Self::check_control(&state, requester)?;
        state.playback.play(at_position, now)?;
        let epoch = state.playback.epoch;

        Self::append_sync(&mut state, SyncEventKind::Play, requester, at_position, epoch, now);
        let event = RoomEvent::Played {
            room_id: self.id.clone(),
            participant_id: requester.clone(),
            position: at_position,
            epoch,
            timestamp: now,
        };
        self.hub.broadcast(&self.id, &event);

        debug!(
            room_id = self.id.as_str(),
            participant_id = requester.as_str(),
            position = at_position,
            epoch,
            "Playback started"
        );
        Ok(state.playback.snapshot(now))
    }

    /// Pause playback at `at_position`.
    pub fn pause(
        &self,
        requester: &ParticipantId,
        at_position: f64,
        now: DateTime<Utc>,
    ) -> Result<PlaybackSnapshot> {
        let mut state = self.state.lock();
        Self::check_control(&state, requester)?;
        state.playback.pause(at_position, now)?;
        let epoch = state.playback.epoch;

        Self::append_sync(&mut state, SyncEventKind::Pause, requester, at_position, epoch, now);
        let event = RoomEvent::Paused {
            room_id: self.id.clone(),
            participant_id: requester.clone(),
            position: at_position,
            epoch,
            timestamp: now,
        };
        self.hub.broadcast(&self.id, &event);

        debug!(
            room_id = self.id.as_str(),
            participant_id = requester.as_str(),
            position = at_position,
            epoch,
            "Playback paused"
        );
        Ok(state.playback.snapshot(now))
    }

    /// Jump to `to_position` without changing the run state.
    pub fn seek(
        &self,
        requester: &ParticipantId,
        to_position: f64,
        now: DateTime<Utc>,
    ) -> Result<PlaybackSnapshot> {
        let mut state = self.state.lock();
        Self::check_control(&state, requester)?;
        state.playback.seek(to_position, now)?;
        let epoch = state.playback.epoch;

        Self::append_sync(&mut state, SyncEventKind::Seek, requester, to_position, epoch, now);
        let event = RoomEvent::Sought {
            room_id: self.id.clone(),
            participant_id: requester.clone(),
            position: to_position,
            epoch,
            timestamp: now,
        };
        self.hub.broadcast(&self.id, &event);

        debug!(
            room_id = self.id.as_str(),
            participant_id = requester.as_str(),
            position = to_position,
            epoch,
            "Playback position changed"
        );
        Ok(state.playback.snapshot(now))
    }

    /// Record a client's observed position against the computed one. Pure
    /// observation: drift beyond the configured threshold is logged at
    /// WARN, anything else at DEBUG, and no state changes either way.
    pub fn report_position(
        &self,
        participant_id: &ParticipantId,
        observed: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let state = self.state.lock();
        Self::check_open(&state)?;
        if !state.roster.contains(participant_id) {
            return Err(Error::Forbidden(format!(
                "participant {participant_id} is not in room {}",
                self.id
            )));
        }
        if !observed.is_finite() || observed < 0.0 {
            return Err(Error::InvalidState(format!(
                "invalid observed position: {observed}"
            )));
        }

        let expected = state.playback.position_at(now);
        let drift = (observed - expected).abs();
        if drift > self.config.sync.drift_log_threshold_seconds {
            warn!(
                room_id = self.id.as_str(),
                participant_id = participant_id.as_str(),
                observed,
                expected,
                drift,
                "Client drifted beyond threshold"
            );
        } else {
            debug!(
                room_id = self.id.as_str(),
                participant_id = participant_id.as_str(),
                observed,
                expected,
                drift,
                "Client position report"
            );
        }
        Ok(())
    }

    /// Validate, sequence and fan out one chat message.
    pub fn post_message(
        &self,
        author_id: &ParticipantId,
        text: String,
        now: DateTime<Utc>,
    ) -> Result<ChatMessage> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        let author = state
            .roster
            .get(author_id)
            .map(|seat| seat.participant.clone())
            .ok_or_else(|| {
                Error::Forbidden(format!(
                    "participant {author_id} is not in room {}",
                    self.id
                ))
            })?;

        let message = state.chat.sequence(self.id.clone(), &author, text, now)?;
        state.log.push(RoomLogEntry::Chat(message.clone()));

        let event = RoomEvent::MessagePosted {
            room_id: self.id.clone(),
            message: message.clone(),
        };
        self.hub.broadcast(&self.id, &event);
        Ok(message)
    }

    /// Periodic computed-position broadcast. Skipped before media is
    /// selected and after the room terminates; never advances the epoch.
    pub fn snapshot_tick(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        if state.room.lifecycle.is_closed() {
            return;
        }
        if matches!(
            state.playback.run_state,
            RunState::Uninitialized | RunState::Terminated
        ) {
            return;
        }

        let snapshot = state.playback.snapshot(now);
        state.log.push(RoomLogEntry::Sync(SyncEvent {
            kind: SyncEventKind::Snapshot,
            participant_id: None,
            position: snapshot.position,
            epoch: snapshot.epoch,
            timestamp: now,
        }));

        let event = RoomEvent::Snapshot {
            room_id: self.id.clone(),
            position: snapshot.position,
            run_state: snapshot.run_state,
            epoch: snapshot.epoch,
            timestamp: now,
        };
        let delivered = self.hub.broadcast(&self.id, &event);

        debug!(
            room_id = self.id.as_str(),
            position = snapshot.position,
            epoch = snapshot.epoch,
            delivered,
            "Snapshot broadcast"
        );
    }

    /// Evict every participant whose heartbeat has expired, with the same
    /// handoff rules as an explicit leave. When the evictions empty the
    /// room, returns the emptiness interval they opened so the caller can
    /// schedule its grace closure.
    pub fn sweep(&self, now: DateTime<Utc>) -> Option<u64> {
        let mut state = self.state.lock();
        if state.room.lifecycle.is_closed() {
            return None;
        }
        let expired = state
            .roster
            .expired(now, self.config.presence.heartbeat_timeout_seconds);
        if expired.is_empty() {
            return None;
        }

        for participant_id in &expired {
            self.depart_locked(&mut state, participant_id, now);
            info!(
                room_id = self.id.as_str(),
                participant_id = participant_id.as_str(),
                "Participant evicted after heartbeat timeout"
            );
        }

        if state.roster.is_empty() {
            state.vacancy += 1;
            Some(state.vacancy)
        } else {
            None
        }
    }

    /// Close the room. `requester` is `None` for engine-initiated closure;
    /// otherwise only the host may close. Closing an already-closed room
    /// is a no-op.
    pub fn close(
        &self,
        requester: Option<&ParticipantId>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.room.lifecycle.is_closed() {
            return Ok(());
        }
        if let Some(requester) = requester {
            if *requester != state.room.host_id {
                return Err(Error::Forbidden(
                    "only the host can close the room".to_string(),
                ));
            }
        }
        self.close_locked(&mut state, reason, now);
        Ok(())
    }

    /// Close the room if its grace period ran out with nobody inside.
    /// `vacancy` names the emptiness interval the closure was scheduled
    /// for; a room that was reoccupied and emptied again since then
    /// carries a newer interval, and the stale closure stands down.
    /// Returns true when this call closed the room.
    pub fn close_if_empty(&self, vacancy: u64, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        if state.room.lifecycle.is_closed() || !state.roster.is_empty() {
            return false;
        }
        if state.vacancy != vacancy {
            return false;
        }
        self.close_locked(&mut state, "room empty", now);
        true
    }

    fn close_locked(&self, state: &mut RoomState, reason: &str, now: DateTime<Utc>) {
        state.room.lifecycle = RoomLifecycle::Closed;
        state.playback.terminate(now);
        state.roster = PresenceLedger::new();

        let event = RoomEvent::RoomClosed {
            room_id: self.id.clone(),
            reason: reason.to_string(),
            timestamp: now,
        };
        self.hub.broadcast(&self.id, &event);
        self.hub.remove_room(&self.id);
        self.cancel_token.cancel();

        info!(room_id = self.id.as_str(), reason, "Room closed");
    }

    /// Shared removal path for leave and eviction. Returns `None` if the
    /// participant was not seated; otherwise the promoted host, if the
    /// departure triggered a handoff.
    fn depart_locked(
        &self,
        state: &mut RoomState,
        participant_id: &ParticipantId,
        now: DateTime<Utc>,
    ) -> Option<Option<ParticipantId>> {
        state.roster.remove(participant_id)?;

        let mut new_host = None;
        if state.room.host_id == *participant_id {
            if let Some(next) = state.roster.first().cloned() {
                state.room.host_id = next.clone();
                new_host = Some(next.clone());
                info!(
                    room_id = self.id.as_str(),
                    new_host = next.as_str(),
                    "Host left, promoted longest-tenured participant"
                );
            }
        }

        let event = RoomEvent::ParticipantLeft {
            room_id: self.id.clone(),
            participant_id: participant_id.clone(),
            new_host: new_host.clone(),
            timestamp: now,
        };
        // The leaver sees their own departure before their subscriptions go.
        self.hub.broadcast(&self.id, &event);
        self.hub.unsubscribe_participant(&self.id, participant_id);

        Some(new_host)
    }

    fn check_open(state: &RoomState) -> Result<()> {
        if state.room.lifecycle.is_closed() {
            return Err(Error::Closed(state.room.id.to_string()));
        }
        Ok(())
    }

    /// Control gate: the room must be open, the requester seated, and,
    /// under host-only control, the host.
    fn check_control(state: &RoomState, requester: &ParticipantId) -> Result<()> {
        Self::check_open(state)?;
        if !state.roster.contains(requester) {
            return Err(Error::Forbidden(format!(
                "participant {requester} is not in room {}",
                state.room.id
            )));
        }
        if state.room.host_only_control && *requester != state.room.host_id {
            return Err(Error::Forbidden(
                "only the host controls playback".to_string(),
            ));
        }
        Ok(())
    }

    fn append_sync(
        state: &mut RoomState,
        kind: SyncEventKind,
        requester: &ParticipantId,
        position: f64,
        epoch: u64,
        now: DateTime<Utc>,
    ) {
        state.log.push(RoomLogEntry::Sync(SyncEvent {
            kind,
            participant_id: Some(requester.clone()),
            position,
            epoch,
            timestamp: now,
        }));
    }

    fn info_locked(state: &RoomState) -> RoomInfo {
        let host_name = state
            .roster
            .get(&state.room.host_id)
            .map(|seat| seat.participant.display_name.clone())
            .unwrap_or_default();
        RoomInfo {
            id: state.room.id.clone(),
            name: state.room.name.clone(),
            description: state.room.description.clone(),
            participant_count: state.roster.len(),
            max_participants: state.room.max_participants,
            is_private: state.room.is_private,
            media_title: state.playback.media.as_ref().map(|m| m.title.clone()),
            host_id: state.room.host_id.clone(),
            host_name,
            lifecycle: state.room.lifecycle,
            created_at: state.room.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RoomConfig;
    use chrono::Duration;

    fn make_session(
        max_participants: u32,
        host_only_control: Option<bool>,
    ) -> (Arc<RoomSession>, Participant, DateTime<Utc>) {
        let t0 = Utc::now();
        let host = Participant::new("alice");
        let config = Arc::new(Config::default());
        let room_config = RoomConfig {
            name: "movie night".to_string(),
            description: None,
            max_participants,
            is_private: false,
            password: None,
            host_only_control,
        };
        let room = Room::from_config(
            &room_config,
            host.id.clone(),
            None,
            config.sync.host_only_control,
            t0,
        );
        let session = RoomSession::new(room, host.clone(), EventHub::new(), config, t0);
        (session, host, t0)
    }

    fn media() -> MediaRef {
        MediaRef::new("Big Buck Bunny", "https://example.com/bbb.mp4")
    }

    #[test]
    fn test_join_caps_at_capacity() {
        let (session, _host, t0) = make_session(2, None);
        assert!(session.join(Participant::new("bob"), t0).is_ok());

        let err = session.join(Participant::new("carol"), t0).unwrap_err();
        assert!(matches!(err, Error::Full(_)));
    }

    #[test]
    fn test_duplicate_join_rejected() {
        let (session, _host, t0) = make_session(10, None);
        let bob = Participant::new("bob");
        session.join(bob.clone(), t0).unwrap();

        let err = session.join(bob, t0).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_join_result_carries_snapshot_backlog_roster() {
        let (session, host, t0) = make_session(10, None);
        session.select_media(&host.id, media(), t0).unwrap();
        session.play(&host.id, 0.0, t0).unwrap();
        session
            .post_message(&host.id, "starting!".to_string(), t0)
            .unwrap();

        let result = session
            .join(Participant::new("bob"), t0 + Duration::seconds(4))
            .unwrap();

        assert_eq!(result.snapshot.run_state, RunState::Playing);
        assert_eq!(result.snapshot.epoch, 2);
        assert!((result.snapshot.position - 4.0).abs() < 1e-9);
        assert_eq!(result.backlog.len(), 1);
        assert_eq!(result.backlog[0].text, "starting!");
        assert_eq!(result.roster.len(), 2);
        assert_eq!(result.roster[0].display_name, "alice");
        assert_eq!(result.room.host_id, host.id);
    }

    #[test]
    fn test_leave_promotes_longest_tenured() {
        let (session, host, t0) = make_session(10, None);
        let bob = Participant::new("bob");
        let carol = Participant::new("carol");
        session.join(bob.clone(), t0 + Duration::seconds(1)).unwrap();
        session.join(carol, t0 + Duration::seconds(2)).unwrap();

        let outcome = session.leave(&host.id, t0 + Duration::seconds(3));
        assert!(outcome.removed);
        assert_eq!(outcome.new_host, Some(bob.id.clone()));
        assert!(!outcome.room_empty);
        assert_eq!(session.info().host_id, bob.id);
        assert_eq!(session.info().host_name, "bob");
    }

    #[test]
    fn test_leave_is_idempotent() {
        let (session, _host, t0) = make_session(10, None);
        let bob = Participant::new("bob");
        session.join(bob.clone(), t0).unwrap();

        assert!(session.leave(&bob.id, t0).removed);
        let again = session.leave(&bob.id, t0);
        assert!(!again.removed);
        assert!(again.new_host.is_none());
        assert!(!again.room_empty);
    }

    #[test]
    fn test_last_leave_flags_empty_room() {
        let (session, host, t0) = make_session(10, None);
        let outcome = session.leave(&host.id, t0);
        assert!(outcome.removed);
        assert!(outcome.room_empty);
        assert!(outcome.new_host.is_none());
    }

    #[test]
    fn test_join_into_empty_room_adopts_host() {
        let (session, host, t0) = make_session(10, None);
        session.leave(&host.id, t0);

        let bob = Participant::new("bob");
        session.join(bob.clone(), t0 + Duration::seconds(5)).unwrap();
        assert_eq!(session.info().host_id, bob.id);
    }

    #[test]
    fn test_control_requires_host_by_default() {
        let (session, host, t0) = make_session(10, None);
        let bob = Participant::new("bob");
        session.join(bob.clone(), t0).unwrap();

        let err = session.select_media(&bob.id, media(), t0).unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        let snapshot = session.select_media(&host.id, media(), t0).unwrap();
        assert_eq!(snapshot.epoch, 1);
    }

    #[test]
    fn test_shared_control_when_host_only_disabled() {
        let (session, _host, t0) = make_session(10, Some(false));
        let bob = Participant::new("bob");
        session.join(bob.clone(), t0).unwrap();

        session.select_media(&bob.id, media(), t0).unwrap();
        let snapshot = session.play(&bob.id, 0.0, t0).unwrap();
        assert_eq!(snapshot.epoch, 2);
        assert!(snapshot.run_state.is_playing());
    }

    #[test]
    fn test_outsider_cannot_control_or_chat() {
        let (session, _host, t0) = make_session(10, Some(false));
        let outsider = Participant::new("mallory");

        let err = session.play(&outsider.id, 0.0, t0).unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        let err = session
            .post_message(&outsider.id, "hi".to_string(), t0)
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[test]
    fn test_epoch_advances_gap_free_across_intents() {
        let (session, host, t0) = make_session(10, None);
        session.select_media(&host.id, media(), t0).unwrap();
        session.play(&host.id, 0.0, t0 + Duration::seconds(1)).unwrap();
        session
            .pause(&host.id, 10.0, t0 + Duration::seconds(2))
            .unwrap();
        session
            .seek(&host.id, 30.0, t0 + Duration::seconds(3))
            .unwrap();

        let log = session.room_log();
        let epochs: Vec<u64> = log
            .iter()
            .filter_map(|entry| match entry {
                RoomLogEntry::Sync(event) => Some(event.epoch),
                RoomLogEntry::Chat(_) => None,
            })
            .collect();
        assert_eq!(epochs, vec![1, 2, 3, 4]);

        let kinds: Vec<SyncEventKind> = log
            .iter()
            .filter_map(|entry| match entry {
                RoomLogEntry::Sync(event) => Some(event.kind),
                RoomLogEntry::Chat(_) => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                SyncEventKind::Select,
                SyncEventKind::Play,
                SyncEventKind::Pause,
                SyncEventKind::Seek,
            ]
        );
    }

    #[test]
    fn test_snapshot_tick_observes_without_epoch_bump() {
        let (session, host, t0) = make_session(10, None);
        let mut rx = session.hub.subscribe(
            session.id().clone(),
            host.id.clone(),
            "conn-1".to_string(),
        );

        session.select_media(&host.id, media(), t0).unwrap();
        session.play(&host.id, 0.0, t0).unwrap();
        session.snapshot_tick(t0 + Duration::seconds(5));

        // Drain the control events, then inspect the snapshot.
        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        match last {
            Some(RoomEvent::Snapshot {
                position, epoch, ..
            }) => {
                assert!((position - 5.0).abs() < 1e-9);
                assert_eq!(epoch, 2);
            }
            other => panic!("expected snapshot event, got {other:?}"),
        }

        // The snapshot is logged but the next transition still gets epoch 3.
        let snapshot = session
            .pause(&host.id, 5.0, t0 + Duration::seconds(6))
            .unwrap();
        assert_eq!(snapshot.epoch, 3);
    }

    #[test]
    fn test_snapshot_tick_skips_before_media_selected() {
        let (session, host, t0) = make_session(10, None);
        let mut rx = session.hub.subscribe(
            session.id().clone(),
            host.id.clone(),
            "conn-1".to_string(),
        );

        session.snapshot_tick(t0 + Duration::seconds(5));
        assert!(rx.try_recv().is_err());
        assert!(session.room_log().is_empty());
    }

    #[test]
    fn test_sweep_evicts_expired_and_hands_off() {
        let (session, host, t0) = make_session(10, None);
        let bob = Participant::new("bob");
        session.join(bob.clone(), t0).unwrap();
        session
            .touch(&bob.id, t0 + Duration::seconds(25))
            .unwrap();

        // Host never heartbeats; 30s timeout expired at t0+31.
        let emptied = session.sweep(t0 + Duration::seconds(31));
        assert!(emptied.is_none());
        assert_eq!(session.info().participant_count, 1);
        assert_eq!(session.info().host_id, bob.id);

        let emptied = session.sweep(t0 + Duration::seconds(70));
        assert!(emptied.is_some());
        assert_eq!(session.info().participant_count, 0);
    }

    #[test]
    fn test_touch_unknown_participant_is_not_found() {
        let (session, _host, t0) = make_session(10, None);
        let err = session
            .touch(&ParticipantId::from_string("ghost".to_string()), t0)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_close_requires_host_and_is_idempotent() {
        let (session, host, t0) = make_session(10, None);
        let bob = Participant::new("bob");
        session.join(bob.clone(), t0).unwrap();
        let mut rx = session.hub.subscribe(
            session.id().clone(),
            bob.id.clone(),
            "conn-bob".to_string(),
        );

        let err = session.close(Some(&bob.id), "takeover", t0).unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        session.close(Some(&host.id), "closed by host", t0).unwrap();
        assert!(!session.is_open());
        assert!(session.cancel_token().is_cancelled());

        match rx.try_recv() {
            Ok(RoomEvent::RoomClosed { reason, .. }) => assert_eq!(reason, "closed by host"),
            other => panic!("expected room_closed, got {other:?}"),
        }
        // Subscriptions are torn down with the room.
        assert!(rx.try_recv().is_err());

        // Closing again is a no-op, and further intents are refused.
        session.close(Some(&host.id), "again", t0).unwrap();
        let err = session.join(Participant::new("dave"), t0).unwrap_err();
        assert!(matches!(err, Error::Closed(_)));
        let err = session.play(&host.id, 0.0, t0).unwrap_err();
        assert!(matches!(err, Error::Closed(_)));
    }

    #[test]
    fn test_close_freezes_playback() {
        let (session, host, t0) = make_session(10, None);
        session.select_media(&host.id, media(), t0).unwrap();
        session.play(&host.id, 0.0, t0).unwrap();

        session
            .close(Some(&host.id), "done", t0 + Duration::seconds(8))
            .unwrap();

        let snapshot = session.playback_snapshot(t0 + Duration::seconds(60));
        assert_eq!(snapshot.run_state, RunState::Terminated);
        assert!((snapshot.position - 8.0).abs() < 1e-9);
        assert_eq!(snapshot.epoch, 2);
    }

    #[test]
    fn test_close_if_empty_only_fires_on_empty_rooms() {
        let (session, host, t0) = make_session(10, None);
        assert!(!session.close_if_empty(0, t0));
        assert!(session.is_open());

        let outcome = session.leave(&host.id, t0);
        assert!(session.close_if_empty(outcome.vacancy, t0 + Duration::seconds(60)));
        assert!(!session.is_open());
    }

    #[test]
    fn test_stale_empty_closure_stands_down_after_reoccupancy() {
        let (session, host, t0) = make_session(10, None);
        let first = session.leave(&host.id, t0);
        assert!(first.room_empty);

        let bob = Participant::new("bob");
        session.join(bob.clone(), t0 + Duration::seconds(30)).unwrap();
        let second = session.leave(&bob.id, t0 + Duration::seconds(35));
        assert!(second.room_empty);
        assert_ne!(first.vacancy, second.vacancy);

        // The closure scheduled at the first emptying reaches its deadline,
        // but the room has only been empty again since t0+35.
        assert!(!session.close_if_empty(first.vacancy, t0 + Duration::seconds(60)));
        assert!(session.is_open());

        // Bob's departure owns the current interval and may close.
        assert!(session.close_if_empty(second.vacancy, t0 + Duration::seconds(95)));
        assert!(!session.is_open());
    }

    #[test]
    fn test_report_position_validates_and_observes() {
        let (session, host, t0) = make_session(10, None);
        session.select_media(&host.id, media(), t0).unwrap();
        session.play(&host.id, 0.0, t0).unwrap();

        let outsider = ParticipantId::from_string("ghost".to_string());
        let err = session
            .report_position(&outsider, 3.0, t0 + Duration::seconds(3))
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        let err = session
            .report_position(&host.id, -1.0, t0 + Duration::seconds(3))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        // In step and drifted reports both succeed; drift only logs.
        session
            .report_position(&host.id, 3.1, t0 + Duration::seconds(3))
            .unwrap();
        session
            .report_position(&host.id, 30.0, t0 + Duration::seconds(3))
            .unwrap();
    }

    #[test]
    fn test_chat_sequences_and_broadcasts() {
        let (session, host, t0) = make_session(10, None);
        let bob = Participant::new("bob");
        session.join(bob.clone(), t0).unwrap();
        let mut rx = session.hub.subscribe(
            session.id().clone(),
            bob.id.clone(),
            "conn-bob".to_string(),
        );

        let first = session
            .post_message(&host.id, "hello".to_string(), t0)
            .unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(first.author_name, "alice");

        let err = session
            .post_message(&bob.id, "   ".to_string(), t0)
            .unwrap_err();
        assert!(matches!(err, Error::TooLong(_)));

        let second = session
            .post_message(&bob.id, "hi!".to_string(), t0)
            .unwrap();
        assert_eq!(second.sequence, 2);

        match rx.try_recv() {
            Ok(RoomEvent::MessagePosted { message, .. }) => assert_eq!(message.sequence, 1),
            other => panic!("expected message_posted, got {other:?}"),
        }
    }
}

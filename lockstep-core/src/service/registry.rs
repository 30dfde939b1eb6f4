//! Room registry: the engine's front door.
//!
//! Owns every live [`RoomSession`], routes intents to them, runs the
//! per-room timer task (snapshot broadcasts and presence sweeps) and
//! schedules the grace-period closure of emptied rooms. Cheap to clone;
//! clones share the same room map and hub.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Duration};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{
    ChatMessage, MediaRef, Participant, ParticipantId, PlaybackSnapshot, Room, RoomConfig,
    RoomEvent, RoomId, RoomInfo, RoomLogEntry,
};

use super::hub::{ConnectionId, EventHub};
use super::password::{hash_password, verify_password};
use super::session::{JoinResult, LeaveOutcome, RoomSession};

/// Result of a successful room creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomCreated {
    pub room: RoomInfo,
    pub snapshot: PlaybackSnapshot,
}

/// Registry of live rooms.
#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Arc<DashMap<RoomId, Arc<RoomSession>>>,
    hub: EventHub,
    config: Arc<Config>,
}

impl fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("rooms", &self.rooms.len())
            .field("connections", &self.hub.connection_count())
            .finish()
    }
}

impl RoomRegistry {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            hub: EventHub::new(),
            config: Arc::new(config),
        }
    }

    /// Fan-out hub, for gateways that manage subscriptions directly.
    #[must_use]
    pub const fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Validate the config, hash the password if the room is private, and
    /// start the room with `host` seated. Async because the Argon2id
    /// derivation runs on the blocking pool.
    pub async fn create_room(&self, config: RoomConfig, host: Participant) -> Result<RoomCreated> {
        config.validate()?;

        // validate() guarantees a private room carries a password.
        let password_hash = match (&config.password, config.is_private) {
            (Some(password), true) => Some(hash_password(password).await?),
            _ => None,
        };

        let now = Utc::now();
        let host_id = host.id.clone();
        let room = Room::from_config(
            &config,
            host_id.clone(),
            password_hash,
            self.config.sync.host_only_control,
            now,
        );
        let session = RoomSession::new(room, host, self.hub.clone(), Arc::clone(&self.config), now);
        let room_id = session.id().clone();

        self.rooms.insert(room_id.clone(), Arc::clone(&session));
        self.spawn_room_timers(Arc::clone(&session));

        info!(
            room_id = room_id.as_str(),
            host_id = host_id.as_str(),
            is_private = config.is_private,
            "Room created"
        );

        Ok(RoomCreated {
            room: session.info(),
            snapshot: session.playback_snapshot(now),
        })
    }

    /// Seat `participant` in a room. For private rooms the password is
    /// verified outside the room lock; the seat gate runs again when the
    /// seat is actually taken.
    pub async fn join_room(
        &self,
        room_id: &RoomId,
        participant: Participant,
        password: Option<&str>,
    ) -> Result<JoinResult> {
        let session = self.session(room_id)?;

        if let Some(hash) = session.join_gate(&participant.id)? {
            let password = password
                .ok_or_else(|| Error::Unauthorized("room password required".to_string()))?;
            if !verify_password(password, &hash).await? {
                return Err(Error::Unauthorized("invalid room password".to_string()));
            }
        }

        session.join(participant, Utc::now())
    }

    /// Remove a participant. Idempotent: an unknown room or a participant
    /// who already left is a no-op. Schedules the grace-period closure
    /// when the departure empties the room.
    pub fn leave_room(&self, room_id: &RoomId, participant_id: &ParticipantId) -> LeaveOutcome {
        let Some(session) = self.rooms.get(room_id).map(|entry| Arc::clone(entry.value()))
        else {
            return LeaveOutcome::noop();
        };

        let outcome = session.leave(participant_id, Utc::now());
        if outcome.room_empty {
            self.schedule_grace_close(session, outcome.vacancy);
        }
        outcome
    }

    /// Close a room on the host's request and drop it from the registry.
    pub fn close_room(&self, room_id: &RoomId, requester: &ParticipantId) -> Result<()> {
        let session = self.session(room_id)?;
        session.close(Some(requester), "closed by host", Utc::now())?;
        self.rooms.remove(room_id);
        Ok(())
    }

    /// Renew a participant's heartbeat.
    pub fn touch(&self, room_id: &RoomId, participant_id: &ParticipantId) -> Result<()> {
        self.session(room_id)?.touch(participant_id, Utc::now())
    }

    pub fn select_media(
        &self,
        room_id: &RoomId,
        requester: &ParticipantId,
        media: MediaRef,
    ) -> Result<PlaybackSnapshot> {
        self.session(room_id)?
            .select_media(requester, media, Utc::now())
    }

    pub fn play(
        &self,
        room_id: &RoomId,
        requester: &ParticipantId,
        at_position: f64,
    ) -> Result<PlaybackSnapshot> {
        self.session(room_id)?.play(requester, at_position, Utc::now())
    }

    pub fn pause(
        &self,
        room_id: &RoomId,
        requester: &ParticipantId,
        at_position: f64,
    ) -> Result<PlaybackSnapshot> {
        self.session(room_id)?
            .pause(requester, at_position, Utc::now())
    }

    pub fn seek(
        &self,
        room_id: &RoomId,
        requester: &ParticipantId,
        to_position: f64,
    ) -> Result<PlaybackSnapshot> {
        self.session(room_id)?.seek(requester, to_position, Utc::now())
    }

    /// Record a client's observed position for drift logging.
    pub fn report_position(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        observed: f64,
    ) -> Result<()> {
        self.session(room_id)?
            .report_position(participant_id, observed, Utc::now())
    }

    /// Validate, sequence and fan out one chat message.
    pub fn post_message(
        &self,
        room_id: &RoomId,
        author_id: &ParticipantId,
        text: String,
    ) -> Result<ChatMessage> {
        self.session(room_id)?.post_message(author_id, text, Utc::now())
    }

    /// Current playback view of a room, for resyncing clients.
    pub fn playback_snapshot(&self, room_id: &RoomId) -> Result<PlaybackSnapshot> {
        Ok(self.session(room_id)?.playback_snapshot(Utc::now()))
    }

    /// Copy of a room's append-only log.
    pub fn room_log(&self, room_id: &RoomId) -> Result<Vec<RoomLogEntry>> {
        Ok(self.session(room_id)?.room_log())
    }

    pub fn room_info(&self, room_id: &RoomId) -> Result<RoomInfo> {
        Ok(self.session(room_id)?.info())
    }

    /// Join-ordered roster of a room; the first entry is the host.
    pub fn list_active(&self, room_id: &RoomId) -> Result<Vec<Participant>> {
        Ok(self.session(room_id)?.list_active())
    }

    /// Lobby listing of open rooms.
    #[must_use]
    pub fn list_rooms(&self) -> Vec<RoomInfo> {
        let sessions: Vec<Arc<RoomSession>> = self
            .rooms
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        sessions
            .iter()
            .map(|session| session.info())
            .filter(|info| info.lifecycle.is_open())
            .collect()
    }

    /// Open an event subscription for a seated participant's connection.
    pub fn subscribe(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        connection_id: ConnectionId,
    ) -> Result<mpsc::UnboundedReceiver<RoomEvent>> {
        let session = self.session(room_id)?;
        if !session.is_participant(participant_id) {
            return Err(Error::Forbidden(format!(
                "participant {participant_id} is not in room {room_id}"
            )));
        }
        Ok(self
            .hub
            .subscribe(room_id.clone(), participant_id.clone(), connection_id))
    }

    /// Drop one connection's subscription.
    pub fn unsubscribe(&self, connection_id: &str) {
        self.hub.unsubscribe(connection_id);
    }

    fn session(&self, room_id: &RoomId) -> Result<Arc<RoomSession>> {
        self.rooms
            .get(room_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::NotFound(format!("room {room_id}")))
    }

    /// Per-room timer task: periodic snapshots and presence sweeps, until
    /// the room's cancellation token fires.
    fn spawn_room_timers(&self, session: Arc<RoomSession>) {
        let registry = self.clone();
        tokio::spawn(async move {
            let cancel_token = session.cancel_token();
            let mut snapshot_timer = interval(Duration::from_secs(
                registry.config.sync.snapshot_interval_seconds,
            ));
            let mut sweep_timer = interval(Duration::from_secs(
                registry.config.presence.sweep_interval_seconds,
            ));
            // Intervals fire immediately; consume the first ticks so the
            // first snapshot lands one full period after creation.
            snapshot_timer.tick().await;
            sweep_timer.tick().await;

            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => break,
                    _ = snapshot_timer.tick() => {
                        session.snapshot_tick(Utc::now());
                    }
                    _ = sweep_timer.tick() => {
                        if let Some(vacancy) = session.sweep(Utc::now()) {
                            registry.schedule_grace_close(Arc::clone(&session), vacancy);
                        }
                    }
                }
            }
            debug!(room_id = session.id().as_str(), "Room timers stopped");
        });
    }

    /// Give an emptied room one grace period to be rejoined before it
    /// closes. The re-check runs under the room lock: a join during the
    /// grace period keeps the room alive, and a rejoin that empties the
    /// room again opens a new interval whose own closure supersedes this
    /// one, so the full grace period restarts.
    fn schedule_grace_close(&self, session: Arc<RoomSession>, vacancy: u64) {
        let rooms = Arc::clone(&self.rooms);
        let grace = Duration::from_secs(self.config.room.empty_room_grace_seconds);

        info!(
            room_id = session.id().as_str(),
            grace_seconds = self.config.room.empty_room_grace_seconds,
            "Room empty, closure scheduled"
        );

        tokio::spawn(async move {
            let cancel_token = session.cancel_token();
            tokio::select! {
                () = cancel_token.cancelled() => {}
                () = sleep(grace) => {
                    if session.close_if_empty(vacancy, Utc::now()) {
                        rooms.remove(session.id());
                    }
                }
            }
        });
    }
}

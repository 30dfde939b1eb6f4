use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::models::{ParticipantId, RoomEvent, RoomId};

/// Handle for one gateway connection subscription
pub type ConnectionId = String;

/// Message sender for a gateway connection
pub type EventSender = mpsc::UnboundedSender<RoomEvent>;

/// Subscriber information
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub connection_id: ConnectionId,
    pub participant_id: ParticipantId,
    pub sender: EventSender,
}

/// Fan-out boundary between the engine and the gateway.
///
/// A connection subscribes to one room and receives every [`RoomEvent`]
/// broadcast for it. Sends are non-blocking and best-effort per
/// connection: a failed send marks the connection for cleanup and never
/// stalls the room's serialization point.
#[derive(Clone)]
pub struct EventHub {
    /// Map of room_id -> list of subscribers
    rooms: Arc<DashMap<RoomId, Vec<Subscriber>>>,

    /// Map of connection_id -> (room_id, participant_id) for cleanup
    connections: Arc<DashMap<ConnectionId, (RoomId, ParticipantId)>>,
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            connections: Arc::new(DashMap::new()),
        }
    }

    /// Subscribe a connection to a room's events. Returns the receiving
    /// half handed to the gateway.
    pub fn subscribe(
        &self,
        room_id: RoomId,
        participant_id: ParticipantId,
        connection_id: ConnectionId,
    ) -> mpsc::UnboundedReceiver<RoomEvent> {
        let (tx, rx) = mpsc::unbounded_channel();

        let subscriber = Subscriber {
            connection_id: connection_id.clone(),
            participant_id: participant_id.clone(),
            sender: tx,
        };

        self.rooms
            .entry(room_id.clone())
            .or_insert_with(Vec::new)
            .push(subscriber);

        self.connections
            .insert(connection_id.clone(), (room_id.clone(), participant_id.clone()));

        info!(
            room_id = %room_id.as_str(),
            participant_id = %participant_id.as_str(),
            connection_id = %connection_id,
            "Connection subscribed to room"
        );

        rx
    }

    /// Unsubscribe a single connection.
    pub fn unsubscribe(&self, connection_id: &str) {
        if let Some((_, (room_id, participant_id))) = self.connections.remove(connection_id) {
            if let Some(mut subscribers) = self.rooms.get_mut(&room_id) {
                subscribers.retain(|sub| sub.connection_id != connection_id);

                if subscribers.is_empty() {
                    drop(subscribers); // Drop the RefMut before removing
                    self.rooms.remove(&room_id);
                }
            }

            info!(
                room_id = %room_id.as_str(),
                participant_id = %participant_id.as_str(),
                connection_id = %connection_id,
                "Connection unsubscribed from room"
            );
        } else {
            warn!(
                connection_id = %connection_id,
                "Attempted to unsubscribe unknown connection"
            );
        }
    }

    /// Drop every subscription a participant holds in a room. Used when a
    /// participant leaves or is evicted; closing the senders ends the
    /// gateway's receive loops for those connections.
    pub fn unsubscribe_participant(&self, room_id: &RoomId, participant_id: &ParticipantId) {
        let stale: Vec<ConnectionId> = self
            .rooms
            .get(room_id)
            .map(|subscribers| {
                subscribers
                    .iter()
                    .filter(|sub| sub.participant_id == *participant_id)
                    .map(|sub| sub.connection_id.clone())
                    .collect()
            })
            .unwrap_or_default();

        for connection_id in stale {
            self.unsubscribe(&connection_id);
        }
    }

    /// Tear down all subscriptions of a room at once (room closed).
    pub fn remove_room(&self, room_id: &RoomId) -> usize {
        let Some((_, subscribers)) = self.rooms.remove(room_id) else {
            return 0;
        };
        for subscriber in &subscribers {
            self.connections.remove(&subscriber.connection_id);
        }
        debug!(
            room_id = %room_id.as_str(),
            dropped = subscribers.len(),
            "Removed all room subscriptions"
        );
        subscribers.len()
    }

    /// Broadcast an event to all subscribers in a room. Returns the number
    /// of connections the event was handed to.
    pub fn broadcast(&self, room_id: &RoomId, event: &RoomEvent) -> usize {
        let mut sent_count = 0;
        let mut failed_connections = Vec::new();

        if let Some(subscribers) = self.rooms.get(room_id) {
            for subscriber in subscribers.iter() {
                match subscriber.sender.send(event.clone()) {
                    Ok(()) => sent_count += 1,
                    Err(err) => {
                        warn!(
                            room_id = %room_id.as_str(),
                            participant_id = %subscriber.participant_id.as_str(),
                            connection_id = %subscriber.connection_id,
                            error = %err,
                            "Failed to send event to connection, marking for cleanup"
                        );
                        failed_connections.push(subscriber.connection_id.clone());
                    }
                }
            }
        }

        // Clean up failed connections
        for conn_id in failed_connections {
            self.unsubscribe(&conn_id);
        }

        if sent_count > 0 {
            debug!(
                room_id = %room_id.as_str(),
                sent_count,
                event_type = %event.event_type(),
                "Event broadcast complete"
            );
        }

        sent_count
    }

    /// Number of subscriptions in a room.
    #[must_use]
    pub fn subscriber_count(&self, room_id: &RoomId) -> usize {
        self.rooms
            .get(room_id)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    /// Total number of live connections across rooms.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("rooms", &self.rooms.len())
            .field("connections", &self.connections.len())
            .finish()
    }
}

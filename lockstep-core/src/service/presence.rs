use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::models::{Participant, ParticipantId, Seat};

/// Join-ordered roster of one room's present participants with their
/// heartbeat deadlines. Host handoff picks the first remaining entry, so
/// iteration order must survive removals (`shift_remove`, never swap).
///
/// Not internally synchronized: lives inside the room's serialization
/// point.
#[derive(Debug, Default)]
pub struct PresenceLedger {
    seats: IndexMap<ParticipantId, Seat>,
}

impl PresenceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            seats: IndexMap::new(),
        }
    }

    /// Seat a participant. Returns `false` without changes when they are
    /// already present.
    pub fn insert(&mut self, participant: Participant, now: DateTime<Utc>) -> bool {
        if self.seats.contains_key(&participant.id) {
            return false;
        }
        let id = participant.id.clone();
        self.seats.insert(id, Seat::new(participant, now));
        true
    }

    /// Remove a participant, preserving join order of the rest.
    pub fn remove(&mut self, id: &ParticipantId) -> Option<Seat> {
        self.seats.shift_remove(id)
    }

    /// Renew a heartbeat. Returns `false` if the participant is not seated.
    pub fn touch(&mut self, id: &ParticipantId, now: DateTime<Utc>) -> bool {
        match self.seats.get_mut(id) {
            Some(seat) => {
                seat.touch(now);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.seats.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &ParticipantId) -> Option<&Seat> {
        self.seats.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seats.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    /// Longest-tenured participant: the handoff target when the host
    /// departs.
    #[must_use]
    pub fn first(&self) -> Option<&ParticipantId> {
        self.seats.keys().next()
    }

    /// Present participants in join order.
    #[must_use]
    pub fn participants(&self) -> Vec<Participant> {
        self.seats.values().map(|seat| seat.participant.clone()).collect()
    }

    /// Participants whose heartbeat lapsed before `now`, in join order.
    #[must_use]
    pub fn expired(&self, now: DateTime<Utc>, timeout_seconds: u64) -> Vec<ParticipantId> {
        self.seats
            .iter()
            .filter(|(_, seat)| seat.is_expired(now, timeout_seconds))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn seat_three(ledger: &mut PresenceLedger, now: DateTime<Utc>) -> Vec<ParticipantId> {
        ["alice", "bob", "carol"]
            .into_iter()
            .map(|name| {
                let p = Participant::new(name);
                let id = p.id.clone();
                assert!(ledger.insert(p, now));
                id
            })
            .collect()
    }

    #[test]
    fn test_join_order_survives_removal() {
        let now = Utc::now();
        let mut ledger = PresenceLedger::new();
        let ids = seat_three(&mut ledger, now);

        ledger.remove(&ids[0]);
        assert_eq!(ledger.first(), Some(&ids[1]));

        let names: Vec<String> = ledger
            .participants()
            .into_iter()
            .map(|p| p.display_name)
            .collect();
        assert_eq!(names, vec!["bob".to_string(), "carol".to_string()]);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let now = Utc::now();
        let mut ledger = PresenceLedger::new();
        let alice = Participant::new("alice");
        assert!(ledger.insert(alice.clone(), now));
        assert!(!ledger.insert(alice, now));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_expired_respects_touch() {
        let t0 = Utc::now();
        let mut ledger = PresenceLedger::new();
        let ids = seat_three(&mut ledger, t0);

        // bob stays live, alice and carol lapse
        assert!(ledger.touch(&ids[1], t0 + Duration::seconds(25)));
        let expired = ledger.expired(t0 + Duration::seconds(35), 30);
        assert_eq!(expired, vec![ids[0].clone(), ids[2].clone()]);

        let ghost = ParticipantId::new();
        assert!(!ledger.touch(&ghost, t0));
    }

    #[test]
    fn test_remove_is_idempotent_on_absent() {
        let mut ledger = PresenceLedger::new();
        assert!(ledger.remove(&ParticipantId::new()).is_none());
        assert!(ledger.is_empty());
    }
}

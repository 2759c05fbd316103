use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{
    Database, DatabaseError, DelegationData, DeviceData, DeviceStatus, EventData, EventStatus,
    NewDelegation, NewDevice, NewEvent, NewParticipant, NewPlaylistTrack, NewVote,
    ParticipantData, PlaylistTrackData, PrimaryKey, Result, VoteData,
};

/// An in-memory database implementation.
///
/// Backs the test suite and is handy for running encore without a
/// postgres instance. State is lost on drop.
#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    next_id: PrimaryKey,
    events: HashMap<PrimaryKey, EventData>,
    participants: Vec<ParticipantData>,
    tracks: HashMap<PrimaryKey, PlaylistTrackData>,
    votes: HashMap<(PrimaryKey, PrimaryKey), VoteData>,
    devices: HashMap<PrimaryKey, DeviceData>,
    delegations: HashMap<PrimaryKey, DelegationData>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl State {
    fn next_id(&mut self) -> PrimaryKey {
        self.next_id += 1;
        self.next_id
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn create_event(&self, new_event: NewEvent) -> Result<EventData> {
        let mut state = self.state.lock();
        let id = state.next_id();

        let event = EventData {
            id,
            title: new_event.title,
            status: EventStatus::Draft,
            visibility: new_event.visibility,
            geofence: new_event.geofence,
            voting_starts_at: new_event.voting_starts_at,
            voting_ends_at: new_event.voting_ends_at,
            current_track_id: None,
            max_votes_per_user: new_event.max_votes_per_user,
            created_by: new_event.created_by,
            created_at: Utc::now(),
        };

        state.events.insert(id, event.clone());
        Ok(event)
    }

    async fn event_by_id(&self, event_id: PrimaryKey) -> Result<EventData> {
        self.state
            .lock()
            .events
            .get(&event_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "event",
                identifier: "id",
            })
    }

    async fn update_event_status(
        &self,
        event_id: PrimaryKey,
        status: EventStatus,
    ) -> Result<EventData> {
        let mut state = self.state.lock();

        let event = state
            .events
            .get_mut(&event_id)
            .ok_or(DatabaseError::NotFound {
                resource: "event",
                identifier: "id",
            })?;

        event.status = status;
        Ok(event.clone())
    }

    async fn set_current_track(
        &self,
        event_id: PrimaryKey,
        track_id: Option<PrimaryKey>,
    ) -> Result<()> {
        let mut state = self.state.lock();

        let event = state
            .events
            .get_mut(&event_id)
            .ok_or(DatabaseError::NotFound {
                resource: "event",
                identifier: "id",
            })?;

        event.current_track_id = track_id;
        Ok(())
    }

    async fn delete_event(&self, event_id: PrimaryKey) -> Result<()> {
        let mut state = self.state.lock();

        if state.events.remove(&event_id).is_none() {
            return Err(DatabaseError::NotFound {
                resource: "event",
                identifier: "id",
            });
        }

        let track_ids: Vec<_> = state
            .tracks
            .values()
            .filter(|t| t.event_id == event_id)
            .map(|t| t.id)
            .collect();

        state
            .votes
            .retain(|(_, track_id), _| !track_ids.contains(track_id));
        state.tracks.retain(|_, t| t.event_id != event_id);
        state.participants.retain(|p| p.event_id != event_id);

        Ok(())
    }

    async fn create_participant(
        &self,
        new_participant: NewParticipant,
    ) -> Result<ParticipantData> {
        let mut state = self.state.lock();

        let exists = state
            .participants
            .iter()
            .any(|p| p.event_id == new_participant.event_id && p.user_id == new_participant.user_id);

        if exists {
            return Err(DatabaseError::Conflict {
                resource: "participant",
                field: "event:user",
                value: format!("{}:{}", new_participant.event_id, new_participant.user_id),
            });
        }

        let id = state.next_id();
        let participant = ParticipantData {
            id,
            event_id: new_participant.event_id,
            user_id: new_participant.user_id,
            role: new_participant.role,
        };

        state.participants.push(participant.clone());
        Ok(participant)
    }

    async fn participant(
        &self,
        event_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<ParticipantData> {
        self.state
            .lock()
            .participants
            .iter()
            .find(|p| p.event_id == event_id && p.user_id == user_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "participant",
                identifier: "event:user",
            })
    }

    async fn tracks_by_event(&self, event_id: PrimaryKey) -> Result<Vec<PlaylistTrackData>> {
        let mut tracks: Vec<_> = self
            .state
            .lock()
            .tracks
            .values()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect();

        tracks.sort_by_key(|t| t.position);
        Ok(tracks)
    }

    async fn track_by_id(&self, track_id: PrimaryKey) -> Result<PlaylistTrackData> {
        self.state
            .lock()
            .tracks
            .get(&track_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "track",
                identifier: "id",
            })
    }

    async fn create_track(&self, new_track: NewPlaylistTrack) -> Result<PlaylistTrackData> {
        let mut state = self.state.lock();

        let duplicate = state.tracks.values().any(|t| {
            t.event_id == new_track.event_id && t.track_reference == new_track.track_reference
        });

        if duplicate {
            return Err(DatabaseError::Conflict {
                resource: "track",
                field: "reference",
                value: new_track.track_reference,
            });
        }

        let id = state.next_id();
        let track = PlaylistTrackData {
            id,
            event_id: new_track.event_id,
            track_reference: new_track.track_reference,
            position: new_track.position,
            added_by: new_track.added_by,
            added_at: Utc::now(),
        };

        state.tracks.insert(id, track.clone());
        Ok(track)
    }

    async fn delete_track(&self, track_id: PrimaryKey) -> Result<()> {
        let mut state = self.state.lock();

        if state.tracks.remove(&track_id).is_none() {
            return Err(DatabaseError::NotFound {
                resource: "track",
                identifier: "id",
            });
        }

        state.votes.retain(|(_, id), _| *id != track_id);
        Ok(())
    }

    async fn assign_positions(
        &self,
        event_id: PrimaryKey,
        positions: &[(PrimaryKey, i32)],
    ) -> Result<()> {
        let mut state = self.state.lock();

        for (track_id, position) in positions {
            let track = state
                .tracks
                .get_mut(track_id)
                .filter(|t| t.event_id == event_id)
                .ok_or(DatabaseError::NotFound {
                    resource: "track",
                    identifier: "id",
                })?;

            track.position = *position;
        }

        Ok(())
    }

    async fn upsert_vote(&self, new_vote: NewVote) -> Result<VoteData> {
        let mut state = self.state.lock();
        let key = (new_vote.voter_id, new_vote.playlist_track_id);

        if let Some(existing) = state.votes.get_mut(&key) {
            existing.kind = new_vote.kind;
            existing.weight = new_vote.weight;
            existing.cast_at = Utc::now();
            return Ok(existing.clone());
        }

        let id = state.next_id();
        let vote = VoteData {
            id,
            voter_id: new_vote.voter_id,
            playlist_track_id: new_vote.playlist_track_id,
            kind: new_vote.kind,
            weight: new_vote.weight,
            cast_at: Utc::now(),
        };

        state.votes.insert(key, vote.clone());
        Ok(vote)
    }

    async fn vote_for(&self, voter_id: PrimaryKey, track_id: PrimaryKey) -> Result<VoteData> {
        self.state
            .lock()
            .votes
            .get(&(voter_id, track_id))
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "vote",
                identifier: "voter:track",
            })
    }

    async fn delete_vote(&self, voter_id: PrimaryKey, track_id: PrimaryKey) -> Result<()> {
        self.state
            .lock()
            .votes
            .remove(&(voter_id, track_id))
            .map(|_| ())
            .ok_or(DatabaseError::NotFound {
                resource: "vote",
                identifier: "voter:track",
            })
    }

    async fn votes_by_track(&self, track_id: PrimaryKey) -> Result<Vec<VoteData>> {
        Ok(self
            .state
            .lock()
            .votes
            .values()
            .filter(|v| v.playlist_track_id == track_id)
            .cloned()
            .collect())
    }

    async fn votes_by_event(&self, event_id: PrimaryKey) -> Result<Vec<VoteData>> {
        let state = self.state.lock();

        let votes = state
            .votes
            .values()
            .filter(|v| {
                state
                    .tracks
                    .get(&v.playlist_track_id)
                    .is_some_and(|t| t.event_id == event_id)
            })
            .cloned()
            .collect();

        Ok(votes)
    }

    async fn count_voted_tracks(
        &self,
        event_id: PrimaryKey,
        voter_id: PrimaryKey,
    ) -> Result<i64> {
        let state = self.state.lock();

        let count = state
            .votes
            .values()
            .filter(|v| v.voter_id == voter_id)
            .filter(|v| {
                state
                    .tracks
                    .get(&v.playlist_track_id)
                    .is_some_and(|t| t.event_id == event_id)
            })
            .count();

        Ok(count as i64)
    }

    async fn create_device(&self, new_device: NewDevice) -> Result<DeviceData> {
        let mut state = self.state.lock();
        let id = state.next_id();

        let device = DeviceData {
            id,
            owner_id: new_device.owner_id,
            name: new_device.name,
            kind: new_device.kind,
            status: DeviceStatus::Online,
            controllable: new_device.controllable,
            last_seen_at: Utc::now(),
        };

        state.devices.insert(id, device.clone());
        Ok(device)
    }

    async fn device_by_id(&self, device_id: PrimaryKey) -> Result<DeviceData> {
        self.state
            .lock()
            .devices
            .get(&device_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "device",
                identifier: "id",
            })
    }

    async fn replace_delegation(&self, new_delegation: NewDelegation) -> Result<DelegationData> {
        let mut state = self.state.lock();

        let delegation = DelegationData {
            device_id: new_delegation.device_id,
            delegate_user_id: new_delegation.delegate_user_id,
            permissions: new_delegation.permissions,
            granted_at: Utc::now(),
            expires_at: new_delegation.expires_at,
        };

        state
            .delegations
            .insert(new_delegation.device_id, delegation.clone());

        Ok(delegation)
    }

    async fn delegation_by_device(&self, device_id: PrimaryKey) -> Result<DelegationData> {
        self.state
            .lock()
            .delegations
            .get(&device_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "delegation",
                identifier: "device_id",
            })
    }

    async fn delete_delegation(&self, device_id: PrimaryKey) -> Result<()> {
        self.state
            .lock()
            .delegations
            .remove(&device_id)
            .map(|_| ())
            .ok_or(DatabaseError::NotFound {
                resource: "delegation",
                identifier: "device_id",
            })
    }

    async fn clear_expired_delegations(&self) -> Result<u64> {
        let mut state = self.state.lock();
        let now = Utc::now();

        let before = state.delegations.len();
        state.delegations.retain(|_, d| !d.is_expired(now));

        Ok((before - state.delegations.len()) as u64)
    }
}

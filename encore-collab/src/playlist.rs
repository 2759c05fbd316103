use std::{collections::HashSet, sync::Arc};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{
    CollabContext, CollabEvent, DatabaseError, EventStatus, NewPlaylistTrack, PlaylistTrackData,
    PrimaryKey,
};

/// How many times a position write is retried when the store reports an
/// optimistic concurrency conflict before the conflict is surfaced
const MAX_POSITION_RETRIES: usize = 3;

/// Maintains the dense, unique, 1-based position ordering of every
/// event's queue.
///
/// Position mutations on the same event are serialized through an
/// in-process lock keyed by event id, so concurrent writers can never
/// leave duplicate or missing positions. Mutations on different events
/// proceed in parallel.
pub struct PlaylistOrderer {
    context: CollabContext,
    locks: DashMap<PrimaryKey, Arc<Mutex<()>>>,
}

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("Track set does not match the event's queue")]
    NotPermutation,
    #[error("Position {0} is out of bounds")]
    PositionOutOfBounds(i32),
    #[error("User is not allowed to modify this event's queue")]
    NotAllowed,
    #[error("Event has ended")]
    EventEnded,
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

impl PlaylistOrderer {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
            locks: DashMap::new(),
        }
    }

    /// Adds a track to the event's queue. Appends when no position is
    /// given, otherwise inserts there and shifts later entries up.
    pub async fn add_track(
        &self,
        caller_id: PrimaryKey,
        event_id: PrimaryKey,
        track_reference: String,
        position: Option<i32>,
    ) -> Result<PlaylistTrackData, PlaylistError> {
        self.ensure_can_modify(event_id, caller_id).await?;

        let lock = self.lock_for(event_id);
        let _guard = lock.lock().await;

        let tracks = self.context.database.tracks_by_event(event_id).await?;
        let append_at = tracks.len() as i32 + 1;

        if let Some(position) = position {
            if !(1..=append_at).contains(&position) {
                return Err(PlaylistError::PositionOutOfBounds(position));
            }
        }

        let created = self
            .context
            .database
            .create_track(NewPlaylistTrack {
                event_id,
                track_reference,
                added_by: caller_id,
                position: append_at,
            })
            .await?;

        // Shift later entries when inserting somewhere in the middle
        if let Some(position) = position.filter(|p| *p < append_at) {
            let mut order: Vec<_> = tracks.iter().map(|t| t.id).collect();
            order.insert(position as usize - 1, created.id);

            self.assign_with_retry(event_id, &ordered_positions(&order))
                .await?;
        }

        let order = self.current_order(event_id).await?;

        self.context.emit(CollabEvent::PlaylistUpdated {
            event_id,
            ordered_track_ids: order,
        });

        self.context.database.track_by_id(created.id).await.map_err(Into::into)
    }

    /// Removes a track from the queue and compacts the positions after it
    pub async fn remove_track(
        &self,
        caller_id: PrimaryKey,
        event_id: PrimaryKey,
        track_id: PrimaryKey,
    ) -> Result<(), PlaylistError> {
        let event = self.ensure_can_modify(event_id, caller_id).await?;

        let lock = self.lock_for(event_id);
        let _guard = lock.lock().await;

        let track = self.context.database.track_by_id(track_id).await?;

        if track.event_id != event_id {
            return Err(DatabaseError::NotFound {
                resource: "track",
                identifier: "id",
            }
            .into());
        }

        self.context.database.delete_track(track_id).await?;

        if event.current_track_id == Some(track_id) {
            self.context
                .database
                .set_current_track(event_id, None)
                .await?;
        }

        let remaining = self.context.database.tracks_by_event(event_id).await?;
        let order: Vec<_> = remaining.iter().map(|t| t.id).collect();

        self.assign_with_retry(event_id, &ordered_positions(&order))
            .await?;

        self.context.emit(CollabEvent::PlaylistUpdated {
            event_id,
            ordered_track_ids: order,
        });

        Ok(())
    }

    /// Reassigns positions 1..=N following the given order. The ids must
    /// be exactly the event's current track set, no partial reorders.
    pub async fn reorder(
        &self,
        caller_id: PrimaryKey,
        event_id: PrimaryKey,
        ordered_track_ids: Vec<PrimaryKey>,
    ) -> Result<(), PlaylistError> {
        self.ensure_can_modify(event_id, caller_id).await?;

        let lock = self.lock_for(event_id);
        let _guard = lock.lock().await;

        let current = self.context.database.tracks_by_event(event_id).await?;

        let current_ids: HashSet<_> = current.iter().map(|t| t.id).collect();
        let given_ids: HashSet<_> = ordered_track_ids.iter().copied().collect();

        let is_permutation = ordered_track_ids.len() == current.len()
            && given_ids.len() == ordered_track_ids.len()
            && given_ids == current_ids;

        if !is_permutation {
            return Err(PlaylistError::NotPermutation);
        }

        self.assign_with_retry(event_id, &ordered_positions(&ordered_track_ids))
            .await?;

        self.context.emit(CollabEvent::TracksReordered {
            event_id,
            ordered_track_ids,
        });

        Ok(())
    }

    /// Idempotent repair: recomputes positions 1..=N from the current
    /// ascending order. Used after an externally detected inconsistency.
    pub async fn auto_compact(&self, event_id: PrimaryKey) -> Result<(), PlaylistError> {
        // Ensure event exists
        let _ = self.context.database.event_by_id(event_id).await?;

        let lock = self.lock_for(event_id);
        let _guard = lock.lock().await;

        let mut tracks = self.context.database.tracks_by_event(event_id).await?;
        tracks.sort_by(|a, b| {
            a.position
                .cmp(&b.position)
                .then(a.added_at.cmp(&b.added_at))
                .then(a.id.cmp(&b.id))
        });

        let order: Vec<_> = tracks.iter().map(|t| t.id).collect();

        self.assign_with_retry(event_id, &ordered_positions(&order))
            .await?;

        self.context.emit(CollabEvent::PlaylistUpdated {
            event_id,
            ordered_track_ids: order,
        });

        Ok(())
    }

    /// The event's track ids by ascending position
    pub async fn current_order(&self, event_id: PrimaryKey) -> Result<Vec<PrimaryKey>, PlaylistError> {
        let tracks = self.context.database.tracks_by_event(event_id).await?;

        Ok(tracks.iter().map(|t| t.id).collect())
    }

    fn lock_for(&self, event_id: PrimaryKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(event_id)
            .or_insert_with(Default::default)
            .clone()
    }

    async fn ensure_can_modify(
        &self,
        event_id: PrimaryKey,
        caller_id: PrimaryKey,
    ) -> Result<crate::EventData, PlaylistError> {
        let event = self.context.database.event_by_id(event_id).await?;

        if event.status == EventStatus::Ended {
            return Err(PlaylistError::EventEnded);
        }

        let participant = self
            .context
            .database
            .participant(event_id, caller_id)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    PlaylistError::NotAllowed
                } else {
                    PlaylistError::Db(e)
                }
            })?;

        if !participant.role.can_manage_queue() {
            return Err(PlaylistError::NotAllowed);
        }

        Ok(event)
    }

    /// Store-level conflicts on the serialized position write are retried
    /// a bounded number of times before surfacing
    async fn assign_with_retry(
        &self,
        event_id: PrimaryKey,
        positions: &[(PrimaryKey, i32)],
    ) -> Result<(), PlaylistError> {
        let mut attempts = 0;

        loop {
            match self
                .context
                .database
                .assign_positions(event_id, positions)
                .await
            {
                Err(e @ DatabaseError::Conflict { .. }) => {
                    attempts += 1;

                    if attempts >= MAX_POSITION_RETRIES {
                        return Err(e.into());
                    }
                }
                other => return other.map_err(Into::into),
            }
        }
    }
}

/// Pairs each id with its 1-based position in the slice
fn ordered_positions(order: &[PrimaryKey]) -> Vec<(PrimaryKey, i32)> {
    order
        .iter()
        .enumerate()
        .map(|(index, id)| (*id, index as i32 + 1))
        .collect()
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::test_util::{fixture, TestWorld};
    use crate::*;

    use super::*;

    /// A store whose position writes conflict a set number of times
    /// before going through, modelling contention on the deferred
    /// uniqueness check
    struct ContendedDatabase {
        inner: MemoryDatabase,
        conflicts_left: AtomicUsize,
    }

    impl ContendedDatabase {
        fn conflicting(times: usize) -> Arc<Self> {
            Arc::new(Self {
                inner: MemoryDatabase::new(),
                conflicts_left: AtomicUsize::new(times),
            })
        }

        fn position_conflict() -> DatabaseError {
            DatabaseError::Conflict {
                resource: "track",
                field: "position",
                value: "deferred unique check".to_string(),
            }
        }
    }

    #[async_trait]
    impl Database for ContendedDatabase {
        async fn assign_positions(
            &self,
            event_id: PrimaryKey,
            positions: &[(PrimaryKey, i32)],
        ) -> Result<()> {
            let injected = self
                .conflicts_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                    left.checked_sub(1)
                })
                .is_ok();

            if injected {
                return Err(Self::position_conflict());
            }

            self.inner.assign_positions(event_id, positions).await
        }

        async fn create_event(&self, new_event: NewEvent) -> Result<EventData> {
            self.inner.create_event(new_event).await
        }

        async fn event_by_id(&self, event_id: PrimaryKey) -> Result<EventData> {
            self.inner.event_by_id(event_id).await
        }

        async fn update_event_status(
            &self,
            event_id: PrimaryKey,
            status: EventStatus,
        ) -> Result<EventData> {
            self.inner.update_event_status(event_id, status).await
        }

        async fn set_current_track(
            &self,
            event_id: PrimaryKey,
            track_id: Option<PrimaryKey>,
        ) -> Result<()> {
            self.inner.set_current_track(event_id, track_id).await
        }

        async fn delete_event(&self, event_id: PrimaryKey) -> Result<()> {
            self.inner.delete_event(event_id).await
        }

        async fn create_participant(
            &self,
            new_participant: NewParticipant,
        ) -> Result<ParticipantData> {
            self.inner.create_participant(new_participant).await
        }

        async fn participant(
            &self,
            event_id: PrimaryKey,
            user_id: PrimaryKey,
        ) -> Result<ParticipantData> {
            self.inner.participant(event_id, user_id).await
        }

        async fn tracks_by_event(&self, event_id: PrimaryKey) -> Result<Vec<PlaylistTrackData>> {
            self.inner.tracks_by_event(event_id).await
        }

        async fn track_by_id(&self, track_id: PrimaryKey) -> Result<PlaylistTrackData> {
            self.inner.track_by_id(track_id).await
        }

        async fn create_track(&self, new_track: NewPlaylistTrack) -> Result<PlaylistTrackData> {
            self.inner.create_track(new_track).await
        }

        async fn delete_track(&self, track_id: PrimaryKey) -> Result<()> {
            self.inner.delete_track(track_id).await
        }

        async fn upsert_vote(&self, new_vote: NewVote) -> Result<VoteData> {
            self.inner.upsert_vote(new_vote).await
        }

        async fn vote_for(&self, voter_id: PrimaryKey, track_id: PrimaryKey) -> Result<VoteData> {
            self.inner.vote_for(voter_id, track_id).await
        }

        async fn delete_vote(&self, voter_id: PrimaryKey, track_id: PrimaryKey) -> Result<()> {
            self.inner.delete_vote(voter_id, track_id).await
        }

        async fn votes_by_track(&self, track_id: PrimaryKey) -> Result<Vec<VoteData>> {
            self.inner.votes_by_track(track_id).await
        }

        async fn votes_by_event(&self, event_id: PrimaryKey) -> Result<Vec<VoteData>> {
            self.inner.votes_by_event(event_id).await
        }

        async fn count_voted_tracks(
            &self,
            event_id: PrimaryKey,
            voter_id: PrimaryKey,
        ) -> Result<i64> {
            self.inner.count_voted_tracks(event_id, voter_id).await
        }

        async fn create_device(&self, new_device: NewDevice) -> Result<DeviceData> {
            self.inner.create_device(new_device).await
        }

        async fn device_by_id(&self, device_id: PrimaryKey) -> Result<DeviceData> {
            self.inner.device_by_id(device_id).await
        }

        async fn replace_delegation(
            &self,
            new_delegation: NewDelegation,
        ) -> Result<DelegationData> {
            self.inner.replace_delegation(new_delegation).await
        }

        async fn delegation_by_device(&self, device_id: PrimaryKey) -> Result<DelegationData> {
            self.inner.delegation_by_device(device_id).await
        }

        async fn delete_delegation(&self, device_id: PrimaryKey) -> Result<()> {
            self.inner.delete_delegation(device_id).await
        }

        async fn clear_expired_delegations(&self) -> Result<u64> {
            self.inner.clear_expired_delegations().await
        }
    }

    async fn contended_event(collab: &Collab) -> (PrimaryKey, PrimaryKey, PrimaryKey) {
        let event = collab
            .create_event(NewEvent {
                title: "contended event".to_string(),
                visibility: EventVisibility::Public,
                geofence: None,
                voting_starts_at: None,
                voting_ends_at: None,
                max_votes_per_user: None,
                created_by: fixture::USER,
            })
            .await
            .expect("event");

        // Appends never touch assign_positions, so none of the injected
        // conflicts are consumed during setup
        let first = collab
            .playlists
            .add_track(fixture::USER, event.id, "track:a".to_string(), None)
            .await
            .expect("append");
        let second = collab
            .playlists
            .add_track(fixture::USER, event.id, "track:b".to_string(), None)
            .await
            .expect("append");

        (event.id, first.id, second.id)
    }

    async fn positions_of(world: &TestWorld) -> Vec<i32> {
        world
            .collab
            .context()
            .database
            .tracks_by_event(world.event_id)
            .await
            .expect("tracks")
            .iter()
            .map(|t| t.position)
            .collect()
    }

    #[tokio::test]
    async fn test_add_appends_at_end() {
        let world = TestWorld::new().await;

        let first = world.add_track("track:a").await;
        let second = world.add_track("track:b").await;

        assert_eq!(first.position, 1);
        assert_eq!(second.position, 2);
    }

    #[tokio::test]
    async fn test_add_at_position_shifts_later_entries() {
        let world = TestWorld::new().await;

        let first = world.add_track("track:a").await;
        let second = world.add_track("track:b").await;

        let inserted = world
            .collab
            .playlists
            .add_track(fixture::USER, world.event_id, "track:c".to_string(), Some(1))
            .await
            .expect("insert at head");

        assert_eq!(inserted.position, 1);

        let order = world
            .collab
            .playlists
            .current_order(world.event_id)
            .await
            .expect("order");

        assert_eq!(order, vec![inserted.id, first.id, second.id]);
        assert_eq!(positions_of(&world).await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_add_rejects_out_of_bounds_position() {
        let world = TestWorld::new().await;
        world.add_track("track:a").await;

        for position in [0, 3, -1] {
            let result = world
                .collab
                .playlists
                .add_track(
                    fixture::USER,
                    world.event_id,
                    "track:x".to_string(),
                    Some(position),
                )
                .await;

            assert!(matches!(
                result,
                Err(PlaylistError::PositionOutOfBounds(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_remove_compacts_positions() {
        let world = TestWorld::new().await;

        let first = world.add_track("track:a").await;
        let second = world.add_track("track:b").await;
        let third = world.add_track("track:c").await;

        world
            .collab
            .playlists
            .remove_track(fixture::USER, world.event_id, second.id)
            .await
            .expect("remove");

        let order = world
            .collab
            .playlists
            .current_order(world.event_id)
            .await
            .expect("order");

        assert_eq!(order, vec![first.id, third.id]);
        assert_eq!(positions_of(&world).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_reorder_assigns_given_order() {
        let world = TestWorld::new().await;

        let first = world.add_track("track:a").await;
        let second = world.add_track("track:b").await;
        let third = world.add_track("track:c").await;

        world
            .collab
            .playlists
            .reorder(
                fixture::USER,
                world.event_id,
                vec![third.id, first.id, second.id],
            )
            .await
            .expect("reorder");

        let order = world
            .collab
            .playlists
            .current_order(world.event_id)
            .await
            .expect("order");

        assert_eq!(order, vec![third.id, first.id, second.id]);
    }

    #[tokio::test]
    async fn test_reorder_rejects_non_permutations() {
        let world = TestWorld::new().await;

        let first = world.add_track("track:a").await;
        let second = world.add_track("track:b").await;

        // Missing an id
        let result = world
            .collab
            .playlists
            .reorder(fixture::USER, world.event_id, vec![first.id])
            .await;
        assert!(matches!(result, Err(PlaylistError::NotPermutation)));

        // Duplicated id
        let result = world
            .collab
            .playlists
            .reorder(
                fixture::USER,
                world.event_id,
                vec![first.id, first.id],
            )
            .await;
        assert!(matches!(result, Err(PlaylistError::NotPermutation)));

        // Foreign id
        let result = world
            .collab
            .playlists
            .reorder(
                fixture::USER,
                world.event_id,
                vec![first.id, 9999],
            )
            .await;
        assert!(matches!(result, Err(PlaylistError::NotPermutation)));

        // The failed attempts left the queue untouched
        let order = world
            .collab
            .playlists
            .current_order(world.event_id)
            .await
            .expect("order");
        assert_eq!(order, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_plain_participant_cannot_modify_queue() {
        let world = TestWorld::new().await;
        world.join(fixture::OTHER_USER).await;

        let result = world
            .collab
            .playlists
            .add_track(
                fixture::OTHER_USER,
                world.event_id,
                "track:a".to_string(),
                None,
            )
            .await;

        assert!(matches!(result, Err(PlaylistError::NotAllowed)));
    }

    #[tokio::test]
    async fn test_collaborator_can_modify_queue() {
        let world = TestWorld::new().await;
        world
            .join_as(fixture::OTHER_USER, ParticipantRole::Collaborator)
            .await;

        world
            .collab
            .playlists
            .add_track(
                fixture::OTHER_USER,
                world.event_id,
                "track:a".to_string(),
                None,
            )
            .await
            .expect("collaborator adds");
    }

    #[tokio::test]
    async fn test_auto_compact_repairs_gaps() {
        let world = TestWorld::new().await;

        let first = world.add_track("track:a").await;
        let second = world.add_track("track:b").await;
        let third = world.add_track("track:c").await;

        // Corrupt the positions behind the orderer's back
        world
            .collab
            .context()
            .database
            .assign_positions(
                world.event_id,
                &[(first.id, 4), (second.id, 9), (third.id, 12)],
            )
            .await
            .expect("corrupt positions");

        world
            .collab
            .playlists
            .auto_compact(world.event_id)
            .await
            .expect("compact");

        assert_eq!(positions_of(&world).await, vec![1, 2, 3]);

        // Relative order is preserved
        let order = world
            .collab
            .playlists
            .current_order(world.event_id)
            .await
            .expect("order");
        assert_eq!(order, vec![first.id, second.id, third.id]);
    }

    #[tokio::test]
    async fn test_transient_conflicts_are_retried() {
        let database = ContendedDatabase::conflicting(MAX_POSITION_RETRIES - 1);
        let collab = Collab::new(database);

        let (event_id, first, second) = contended_event(&collab).await;

        collab
            .playlists
            .reorder(fixture::USER, event_id, vec![second, first])
            .await
            .expect("reorder succeeds once the conflicts clear");

        let order = collab
            .playlists
            .current_order(event_id)
            .await
            .expect("order");
        assert_eq!(order, vec![second, first]);
    }

    #[tokio::test]
    async fn test_persistent_conflict_surfaces_after_retries() {
        let database = ContendedDatabase::conflicting(MAX_POSITION_RETRIES);
        let collab = Collab::new(database);

        let (event_id, first, second) = contended_event(&collab).await;

        let result = collab
            .playlists
            .reorder(fixture::USER, event_id, vec![second, first])
            .await;

        assert!(matches!(
            result,
            Err(PlaylistError::Db(DatabaseError::Conflict { .. }))
        ));

        // The queue keeps its pre-reorder state
        let order = collab
            .playlists
            .current_order(event_id)
            .await
            .expect("order");
        assert_eq!(order, vec![first, second]);
    }
}

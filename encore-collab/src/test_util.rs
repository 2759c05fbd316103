use std::sync::Arc;

use crate::{
    Collab, DeviceData, EventStatus, EventVisibility, MemoryDatabase, NewDevice, NewEvent,
    NewParticipant, ParticipantRole, PlaylistTrackData, PrimaryKey,
};

pub mod fixture {
    use crate::PrimaryKey;

    pub const USER: PrimaryKey = 101;
    pub const OTHER_USER: PrimaryKey = 102;
    pub const THIRD_USER: PrimaryKey = 103;
}

/// A collab instance over an in-memory database, with one public event
/// created by [fixture::USER]
pub struct TestWorld {
    pub collab: Collab,
    pub event_id: PrimaryKey,
}

impl TestWorld {
    pub async fn new() -> Self {
        let database = Arc::new(MemoryDatabase::new());
        let collab = Collab::new(database);

        let event = collab
            .create_event(NewEvent {
                title: "test event".to_string(),
                visibility: EventVisibility::Public,
                geofence: None,
                voting_starts_at: None,
                voting_ends_at: None,
                max_votes_per_user: None,
                created_by: fixture::USER,
            })
            .await
            .expect("event is created");

        Self {
            collab,
            event_id: event.id,
        }
    }

    /// Appends a track to the event's queue as [fixture::USER]
    pub async fn add_track(&self, reference: &str) -> PlaylistTrackData {
        self.collab
            .playlists
            .add_track(fixture::USER, self.event_id, reference.to_string(), None)
            .await
            .expect("track is added")
    }

    /// Adds the user as a plain participant
    pub async fn join(&self, user_id: PrimaryKey) {
        self.join_as(user_id, ParticipantRole::Participant).await
    }

    pub async fn join_as(&self, user_id: PrimaryKey, role: ParticipantRole) {
        self.collab
            .context()
            .database
            .create_participant(NewParticipant {
                event_id: self.event_id,
                user_id,
                role,
            })
            .await
            .expect("participant is created");
    }

    pub async fn set_status(&self, status: EventStatus) {
        self.collab
            .set_event_status(fixture::USER, self.event_id, status)
            .await
            .expect("status is updated");
    }

    pub async fn add_device(&self, owner_id: PrimaryKey, controllable: bool) -> DeviceData {
        self.collab
            .context()
            .database
            .create_device(NewDevice {
                owner_id,
                name: "living room speaker".to_string(),
                kind: "speaker".to_string(),
                controllable,
            })
            .await
            .expect("device is created")
    }
}

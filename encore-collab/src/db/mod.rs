use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

mod data;
pub use data::*;

mod memory;
pub use memory::*;

mod pg;
pub use pg::*;

pub type Result<T, E = DatabaseError> = std::result::Result<T, E>;
pub type SharedDatabase = Arc<dyn Database>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the database
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A resource already exists
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        /// The resource in question
        resource: &'static str,
        /// The field that is conflicting
        field: &'static str,
        /// The conflicting value
        value: String,
    },
    /// A resource in the database doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
}

impl DatabaseError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound {
                resource: _,
                identifier: _
            }
        )
    }
}

/// Helper trait to reduce boilerplate
pub trait IntoDatabaseError {
    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError;
    fn any(self) -> DatabaseError;
}

/// Helper trait to reduce boilerplate
pub trait DatabaseResult {
    /// Turns the Result into a conflict error if it's Ok()
    fn conflict_or_ok(self, resource: &'static str, field: &'static str, value: &str)
        -> Result<()>;
}

impl<T> DatabaseResult for Result<T> {
    fn conflict_or_ok(
        self,
        resource: &'static str,
        field: &'static str,
        value: &str,
    ) -> Result<()> {
        match self {
            Ok(_) => Err(DatabaseError::Conflict {
                resource,
                field,
                value: value.to_string(),
            }),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Represents a type that can store and fetch encore data.
///
/// Implementations are dumb on purpose. Validation, ordering arithmetic,
/// and authorization live in the managers on top of this trait.
#[async_trait]
pub trait Database: Send + Sync {
    async fn create_event(&self, new_event: NewEvent) -> Result<EventData>;
    async fn event_by_id(&self, event_id: PrimaryKey) -> Result<EventData>;
    async fn update_event_status(
        &self,
        event_id: PrimaryKey,
        status: EventStatus,
    ) -> Result<EventData>;
    async fn set_current_track(
        &self,
        event_id: PrimaryKey,
        track_id: Option<PrimaryKey>,
    ) -> Result<()>;
    /// Deletes the event along with its votes, tracks, and participants,
    /// in that order, inside one transaction
    async fn delete_event(&self, event_id: PrimaryKey) -> Result<()>;

    async fn create_participant(&self, new_participant: NewParticipant)
        -> Result<ParticipantData>;
    async fn participant(
        &self,
        event_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<ParticipantData>;

    /// Returns the event's queue ordered by ascending position
    async fn tracks_by_event(&self, event_id: PrimaryKey) -> Result<Vec<PlaylistTrackData>>;
    async fn track_by_id(&self, track_id: PrimaryKey) -> Result<PlaylistTrackData>;
    async fn create_track(&self, new_track: NewPlaylistTrack) -> Result<PlaylistTrackData>;
    async fn delete_track(&self, track_id: PrimaryKey) -> Result<()>;
    /// Assigns the given positions in one transaction. Every id must
    /// belong to the event.
    async fn assign_positions(
        &self,
        event_id: PrimaryKey,
        positions: &[(PrimaryKey, i32)],
    ) -> Result<()>;

    /// Inserts the vote, or overwrites kind and weight in place when the
    /// (voter, track) pair already holds one
    async fn upsert_vote(&self, new_vote: NewVote) -> Result<VoteData>;
    async fn vote_for(&self, voter_id: PrimaryKey, track_id: PrimaryKey) -> Result<VoteData>;
    async fn delete_vote(&self, voter_id: PrimaryKey, track_id: PrimaryKey) -> Result<()>;
    async fn votes_by_track(&self, track_id: PrimaryKey) -> Result<Vec<VoteData>>;
    async fn votes_by_event(&self, event_id: PrimaryKey) -> Result<Vec<VoteData>>;
    /// How many distinct tracks in the event the voter holds votes on
    async fn count_voted_tracks(&self, event_id: PrimaryKey, voter_id: PrimaryKey)
        -> Result<i64>;

    async fn create_device(&self, new_device: NewDevice) -> Result<DeviceData>;
    async fn device_by_id(&self, device_id: PrimaryKey) -> Result<DeviceData>;

    /// Writes the grant, discarding any existing grant for the device
    async fn replace_delegation(&self, new_delegation: NewDelegation) -> Result<DelegationData>;
    async fn delegation_by_device(&self, device_id: PrimaryKey) -> Result<DelegationData>;
    async fn delete_delegation(&self, device_id: PrimaryKey) -> Result<()>;
    /// Physically removes grants past their expiry, returning how many
    async fn clear_expired_delegations(&self) -> Result<u64>;
}

#[derive(Debug)]
pub struct NewEvent {
    pub title: String,
    pub visibility: EventVisibility,
    pub geofence: Option<Geofence>,
    pub voting_starts_at: Option<DateTime<Utc>>,
    pub voting_ends_at: Option<DateTime<Utc>>,
    pub max_votes_per_user: Option<i32>,
    /// The creator of the new event
    pub created_by: PrimaryKey,
}

#[derive(Debug)]
pub struct NewParticipant {
    pub event_id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub role: ParticipantRole,
}

#[derive(Debug)]
pub struct NewPlaylistTrack {
    pub event_id: PrimaryKey,
    pub track_reference: String,
    pub added_by: PrimaryKey,
    pub position: i32,
}

#[derive(Debug)]
pub struct NewVote {
    pub voter_id: PrimaryKey,
    pub playlist_track_id: PrimaryKey,
    pub kind: VoteKind,
    pub weight: i32,
}

#[derive(Debug)]
pub struct NewDevice {
    pub owner_id: PrimaryKey,
    pub name: String,
    pub kind: String,
    pub controllable: bool,
}

#[derive(Debug)]
pub struct NewDelegation {
    pub device_id: PrimaryKey,
    pub delegate_user_id: PrimaryKey,
    pub permissions: Permissions,
    pub expires_at: Option<DateTime<Utc>>,
}

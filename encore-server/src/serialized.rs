//! All schemas that are exposed from endpoints are defined here
//! along with the ToSerialized impls

use chrono::{DateTime, Utc};
use encore_collab::{
    CastResult, DelegationData, EventData, ParticipantData, PlaylistTrackData,
    TallyEntry as CollabTallyEntry, VoteData,
};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct Event {
    id: i32,
    title: String,
    status: String,
    visibility: String,
    geofence: Option<GeofenceOut>,
    voting_starts_at: Option<DateTime<Utc>>,
    voting_ends_at: Option<DateTime<Utc>>,
    current_track_id: Option<i32>,
    max_votes_per_user: Option<i32>,
    created_by: i32,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GeofenceOut {
    latitude: f64,
    longitude: f64,
    radius_m: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Participant {
    id: i32,
    event_id: i32,
    user_id: i32,
    role: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PlaylistTrack {
    id: i32,
    event_id: i32,
    track_reference: String,
    position: i32,
    added_by: i32,
    added_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Vote {
    id: i32,
    voter_id: i32,
    playlist_track_id: i32,
    kind: String,
    weight: i32,
    cast_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VoteResult {
    track_id: i32,
    score: i32,
    vote: Vote,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TallyEntry {
    track_id: i32,
    position: i32,
    upvotes: i32,
    downvotes: i32,
    score: i32,
    caller_vote: Option<Vote>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Delegation {
    device_id: i32,
    delegate_user_id: i32,
    permissions: PermissionsOut,
    granted_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsOut {
    can_play: bool,
    can_pause: bool,
    can_skip: bool,
    can_change_volume: bool,
    can_change_playlist: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Authorized {
    allowed: bool,
}

impl Authorized {
    pub fn new(allowed: bool) -> Self {
        Self { allowed }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrackScore {
    track_id: i32,
    score: i32,
}

impl TrackScore {
    pub fn new(track_id: i32, score: i32) -> Self {
        Self { track_id, score }
    }
}

/// Helper trait to convert any type into a serialized version
pub trait ToSerialized<T>
where
    T: Serialize,
{
    fn to_serialized(&self) -> T;
}

impl<I, O> ToSerialized<Vec<O>> for Vec<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Vec<O> {
        self.iter().map(|x| x.to_serialized()).collect()
    }
}

impl ToSerialized<Event> for EventData {
    fn to_serialized(&self) -> Event {
        Event {
            id: self.id,
            title: self.title.clone(),
            status: self.status.as_str().to_string(),
            visibility: self.visibility.as_str().to_string(),
            geofence: self.geofence.map(|g| GeofenceOut {
                latitude: g.latitude,
                longitude: g.longitude,
                radius_m: g.radius_m,
            }),
            voting_starts_at: self.voting_starts_at,
            voting_ends_at: self.voting_ends_at,
            current_track_id: self.current_track_id,
            max_votes_per_user: self.max_votes_per_user,
            created_by: self.created_by,
            created_at: self.created_at,
        }
    }
}

impl ToSerialized<Participant> for ParticipantData {
    fn to_serialized(&self) -> Participant {
        Participant {
            id: self.id,
            event_id: self.event_id,
            user_id: self.user_id,
            role: self.role.as_str().to_string(),
        }
    }
}

impl ToSerialized<PlaylistTrack> for PlaylistTrackData {
    fn to_serialized(&self) -> PlaylistTrack {
        PlaylistTrack {
            id: self.id,
            event_id: self.event_id,
            track_reference: self.track_reference.clone(),
            position: self.position,
            added_by: self.added_by,
            added_at: self.added_at,
        }
    }
}

impl ToSerialized<Vote> for VoteData {
    fn to_serialized(&self) -> Vote {
        Vote {
            id: self.id,
            voter_id: self.voter_id,
            playlist_track_id: self.playlist_track_id,
            kind: self.kind.as_str().to_string(),
            weight: self.weight,
            cast_at: self.cast_at,
        }
    }
}

impl ToSerialized<VoteResult> for CastResult {
    fn to_serialized(&self) -> VoteResult {
        VoteResult {
            track_id: self.track_id,
            score: self.score,
            vote: self.vote.to_serialized(),
        }
    }
}

impl ToSerialized<TallyEntry> for CollabTallyEntry {
    fn to_serialized(&self) -> TallyEntry {
        TallyEntry {
            track_id: self.track_id,
            position: self.position,
            upvotes: self.upvotes,
            downvotes: self.downvotes,
            score: self.score,
            caller_vote: self.caller_vote.as_ref().map(|v| v.to_serialized()),
        }
    }
}

impl ToSerialized<Delegation> for DelegationData {
    fn to_serialized(&self) -> Delegation {
        Delegation {
            device_id: self.device_id,
            delegate_user_id: self.delegate_user_id,
            permissions: PermissionsOut {
                can_play: self.permissions.can_play,
                can_pause: self.permissions.can_pause,
                can_skip: self.permissions.can_skip,
                can_change_volume: self.permissions.can_change_volume,
                can_change_playlist: self.permissions.can_change_playlist,
            },
            granted_at: self.granted_at,
            expires_at: self.expires_at,
        }
    }
}

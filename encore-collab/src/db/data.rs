use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The type used for primary keys in the database.
pub type PrimaryKey = i32;

/// Lifecycle status of an event. Transitions are monotonic, an ended
/// event never becomes active again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Draft,
    Active,
    Paused,
    Ended,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Ended => "ended",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventVisibility {
    Public,
    Private,
}

impl EventVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "public" => Some(Self::Public),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

/// A shared listening and voting session, owning an ordered track queue
#[derive(Debug, Clone)]
pub struct EventData {
    pub id: PrimaryKey,
    pub title: String,
    pub status: EventStatus,
    pub visibility: EventVisibility,
    /// Optional geographic restriction. Enforcement requires a caller
    /// location and is left to the adapter in front of this crate.
    pub geofence: Option<Geofence>,
    /// When set, votes are only accepted within this window
    pub voting_starts_at: Option<DateTime<Utc>>,
    pub voting_ends_at: Option<DateTime<Utc>>,
    /// The queue entry currently being played, if any
    pub current_track_id: Option<PrimaryKey>,
    /// When set, caps how many distinct tracks a single user may hold
    /// votes on within this event
    pub max_votes_per_user: Option<i32>,
    pub created_by: PrimaryKey,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Geofence {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Creator,
    Admin,
    Collaborator,
    Participant,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creator => "creator",
            Self::Admin => "admin",
            Self::Collaborator => "collaborator",
            Self::Participant => "participant",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "creator" => Some(Self::Creator),
            "admin" => Some(Self::Admin),
            "collaborator" => Some(Self::Collaborator),
            "participant" => Some(Self::Participant),
            _ => None,
        }
    }

    /// Whether this role may add, remove, or reorder queue entries
    pub fn can_manage_queue(&self) -> bool {
        matches!(self, Self::Creator | Self::Admin | Self::Collaborator)
    }

    /// Whether this role may change event status or delete the event
    pub fn can_manage_event(&self) -> bool {
        matches!(self, Self::Creator | Self::Admin)
    }
}

/// A user's membership in an event
#[derive(Debug, Clone)]
pub struct ParticipantData {
    pub id: PrimaryKey,
    pub event_id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub role: ParticipantRole,
}

/// One track's placement inside an event's queue.
/// Positions are 1-based and always form a dense `1..=N` sequence.
#[derive(Debug, Clone)]
pub struct PlaylistTrackData {
    pub id: PrimaryKey,
    pub event_id: PrimaryKey,
    /// External reference to the track itself (uri, catalog id, etc)
    pub track_reference: String,
    pub position: i32,
    pub added_by: PrimaryKey,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteKind {
    Upvote,
    Downvote,
}

impl VoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upvote => "upvote",
            Self::Downvote => "downvote",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "upvote" => Some(Self::Upvote),
            "downvote" => Some(Self::Downvote),
            _ => None,
        }
    }
}

/// One user's opinion on one queue entry.
/// Unique per (voter, track), casting again overwrites in place.
#[derive(Debug, Clone)]
pub struct VoteData {
    pub id: PrimaryKey,
    pub voter_id: PrimaryKey,
    pub playlist_track_id: PrimaryKey,
    pub kind: VoteKind,
    pub weight: i32,
    pub cast_at: DateTime<Utc>,
}

impl VoteData {
    /// This vote's contribution to its track's score
    pub fn contribution(&self) -> i32 {
        match self.kind {
            VoteKind::Upvote => self.weight,
            VoteKind::Downvote => -self.weight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Playing,
    Paused,
    Error,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            "playing" => Some(Self::Playing),
            "paused" => Some(Self::Paused),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// A controllable playback endpoint
#[derive(Debug, Clone)]
pub struct DeviceData {
    pub id: PrimaryKey,
    pub owner_id: PrimaryKey,
    pub name: String,
    /// Free-form device type, such as "speaker" or "browser"
    pub kind: String,
    pub status: DeviceStatus,
    /// Devices with this flag unset never accept delegation
    pub controllable: bool,
    pub last_seen_at: DateTime<Utc>,
}

/// An action a caller may attempt against a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceAction {
    Play,
    Pause,
    Skip,
    ChangeVolume,
    ChangePlaylist,
}

impl DeviceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Skip => "skip",
            Self::ChangeVolume => "change-volume",
            Self::ChangePlaylist => "change-playlist",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "play" => Some(Self::Play),
            "pause" => Some(Self::Pause),
            "skip" => Some(Self::Skip),
            "change-volume" => Some(Self::ChangeVolume),
            "change-playlist" => Some(Self::ChangePlaylist),
            _ => None,
        }
    }
}

/// The permission set attached to a delegation grant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub can_play: bool,
    pub can_pause: bool,
    pub can_skip: bool,
    pub can_change_volume: bool,
    pub can_change_playlist: bool,
}

impl Permissions {
    pub fn allows(&self, action: DeviceAction) -> bool {
        match action {
            DeviceAction::Play => self.can_play,
            DeviceAction::Pause => self.can_pause,
            DeviceAction::Skip => self.can_skip,
            DeviceAction::ChangeVolume => self.can_change_volume,
            DeviceAction::ChangePlaylist => self.can_change_playlist,
        }
    }
}

/// A time-boxed authorization letting a non-owner act on a device.
/// At most one grant exists per device, enforced by replace-on-write.
#[derive(Debug, Clone)]
pub struct DelegationData {
    pub device_id: PrimaryKey,
    pub delegate_user_id: PrimaryKey,
    pub permissions: Permissions,
    pub granted_at: DateTime<Utc>,
    /// Absent means the grant lasts until explicitly revoked
    pub expires_at: Option<DateTime<Utc>>,
}

impl DelegationData {
    /// A grant past its expiry is inert even while the row still exists
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

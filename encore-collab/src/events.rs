use serde_json::{json, Value};

use crate::{EventStatus, Permissions, PrimaryKey, Room};

/// State changes emitted by the core after their durable write commits.
/// Each event knows the rooms it fans out to and its wire name.
#[derive(Debug, Clone)]
pub enum CollabEvent {
    /// A vote was cast, changed, or retracted, updating a track's score
    VoteUpdated {
        event_id: PrimaryKey,
        track_id: PrimaryKey,
        score: i32,
    },
    /// The queue composition changed (track added, removed, or repaired)
    PlaylistUpdated {
        event_id: PrimaryKey,
        ordered_track_ids: Vec<PrimaryKey>,
    },
    /// The queue was explicitly reordered
    TracksReordered {
        event_id: PrimaryKey,
        ordered_track_ids: Vec<PrimaryKey>,
    },
    /// An event moved to a new lifecycle status
    EventStatusChanged {
        event_id: PrimaryKey,
        status: EventStatus,
    },
    /// An event was deleted along with its queue and votes
    EventDeleted { event_id: PrimaryKey },
    /// Control of a device was handed to a user
    ControlDelegated {
        device_id: PrimaryKey,
        delegate_user_id: PrimaryKey,
        permissions: Permissions,
    },
    /// Control of a device was taken back by its owner
    ControlRevoked { device_id: PrimaryKey },
}

impl CollabEvent {
    /// The wire name receivers subscribe on
    pub fn name(&self) -> &'static str {
        match self {
            Self::VoteUpdated { .. } => "vote-updated",
            Self::PlaylistUpdated { .. } => "playlist-updated",
            Self::TracksReordered { .. } => "tracks-reordered",
            Self::EventStatusChanged { .. } => "event-status-changed",
            Self::EventDeleted { .. } => "event-deleted",
            Self::ControlDelegated { .. } => "control-delegated",
            Self::ControlRevoked { .. } => "control-revoked",
        }
    }

    /// The rooms this event is delivered to
    pub fn rooms(&self) -> Vec<Room> {
        match self {
            Self::VoteUpdated { event_id, .. }
            | Self::EventStatusChanged { event_id, .. }
            | Self::EventDeleted { event_id } => vec![Room::Event(*event_id)],
            Self::PlaylistUpdated { event_id, .. } | Self::TracksReordered { event_id, .. } => {
                vec![Room::Event(*event_id), Room::Playlist(*event_id)]
            }
            Self::ControlDelegated {
                device_id,
                delegate_user_id,
                ..
            } => vec![Room::Device(*device_id), Room::User(*delegate_user_id)],
            Self::ControlRevoked { device_id } => vec![Room::Device(*device_id)],
        }
    }

    /// A minimal payload sufficient for a receiver to patch its view
    pub fn payload(&self) -> Value {
        match self {
            Self::VoteUpdated {
                track_id, score, ..
            } => json!({ "trackId": track_id, "score": score }),
            Self::PlaylistUpdated {
                ordered_track_ids, ..
            }
            | Self::TracksReordered {
                ordered_track_ids, ..
            } => json!({ "orderedTrackIds": ordered_track_ids }),
            Self::EventStatusChanged { status, .. } => json!({ "status": status }),
            Self::EventDeleted { event_id } => json!({ "eventId": event_id }),
            Self::ControlDelegated {
                delegate_user_id,
                permissions,
                ..
            } => json!({ "delegateUserId": delegate_user_id, "permissions": permissions }),
            Self::ControlRevoked { device_id } => json!({ "deviceId": device_id }),
        }
    }
}

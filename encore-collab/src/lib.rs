mod db;
mod delegation;
mod events;
mod playlist;
mod rooms;
mod util;
mod votes;

#[cfg(test)]
mod test_util;

use std::{sync::Arc, time::Duration};

use log::{debug, info};
use thiserror::Error;

pub use db::*;
pub use delegation::*;
pub use events::*;
pub use playlist::*;
pub use rooms::*;
pub use votes::*;

/// The encore collab system: vote aggregation, queue ordering, device
/// delegation, and the room fan-out that keeps clients consistent.
pub struct Collab {
    context: CollabContext,

    pub votes: VoteLedger,
    pub playlists: PlaylistOrderer,
    pub delegations: DelegationManager,
}

/// A type passed to the components of the collab system, to access the
/// store and publish state changes to rooms.
#[derive(Clone)]
pub struct CollabContext {
    pub database: SharedDatabase,
    pub rooms: Arc<RoomBroadcaster>,
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Event cannot move from {} to {}", from.as_str(), to.as_str())]
    InvalidTransition {
        from: EventStatus,
        to: EventStatus,
    },
    #[error("User is not allowed to manage this event")]
    NotAllowed,
    #[error("Event is private")]
    PrivateEvent,
    #[error("Event has ended")]
    EventEnded,
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

impl CollabContext {
    /// Publishes a committed state change to every room it targets.
    /// Fire-and-forget: fan-out never fails the write that triggered it.
    pub fn emit(&self, event: CollabEvent) {
        debug!("Emitting {}", event.name());

        let payload = event.payload();

        for room in event.rooms() {
            self.rooms.publish(room, event.name(), payload.clone());
        }
    }
}

impl Collab {
    pub fn new(database: SharedDatabase) -> Self {
        let context = CollabContext {
            database,
            rooms: RoomBroadcaster::new(),
        };

        let votes = VoteLedger::new(&context);
        let playlists = PlaylistOrderer::new(&context);
        let delegations = DelegationManager::new(&context);

        Self {
            context,
            votes,
            playlists,
            delegations,
        }
    }

    /// The broadcaster live connections attach to
    pub fn rooms(&self) -> &Arc<RoomBroadcaster> {
        &self.context.rooms
    }

    #[cfg(test)]
    pub(crate) fn context(&self) -> &CollabContext {
        &self.context
    }

    /// Spawns the periodic delegation expiry sweep. Must be called inside
    /// a tokio runtime.
    pub fn start_sweeper(&self, every: Duration) {
        self.delegations.start_sweeper(every)
    }

    /// Creates a new event. The creator becomes its first participant
    /// with the creator role.
    pub async fn create_event(&self, new_event: NewEvent) -> Result<EventData, EventError> {
        let created_by = new_event.created_by;
        let event = self.context.database.create_event(new_event).await?;

        self.context
            .database
            .create_participant(NewParticipant {
                event_id: event.id,
                user_id: created_by,
                role: ParticipantRole::Creator,
            })
            .await?;

        info!("Event {} created by user {}", event.id, created_by);
        Ok(event)
    }

    pub async fn event_by_id(&self, event_id: PrimaryKey) -> Result<EventData, EventError> {
        self.context
            .database
            .event_by_id(event_id)
            .await
            .map_err(Into::into)
    }

    pub async fn device_by_id(&self, device_id: PrimaryKey) -> Result<DeviceData, DatabaseError> {
        self.context.database.device_by_id(device_id).await
    }

    /// Adds the user as a plain participant. Private events only admit
    /// users through their creator or admins.
    pub async fn join_event(
        &self,
        user_id: PrimaryKey,
        event_id: PrimaryKey,
    ) -> Result<ParticipantData, EventError> {
        let event = self.context.database.event_by_id(event_id).await?;

        if event.visibility == EventVisibility::Private {
            return Err(EventError::PrivateEvent);
        }

        if event.status == EventStatus::Ended {
            return Err(EventError::EventEnded);
        }

        self.context
            .database
            .create_participant(NewParticipant {
                event_id,
                user_id,
                role: ParticipantRole::Participant,
            })
            .await
            .map_err(Into::into)
    }

    /// Moves the event to a new lifecycle status. Transitions are
    /// monotonic, an ended event stays ended.
    pub async fn set_event_status(
        &self,
        caller_id: PrimaryKey,
        event_id: PrimaryKey,
        status: EventStatus,
    ) -> Result<EventData, EventError> {
        let event = self.context.database.event_by_id(event_id).await?;

        self.ensure_can_manage(event_id, caller_id).await?;

        if !can_transition(event.status, status) {
            return Err(EventError::InvalidTransition {
                from: event.status,
                to: status,
            });
        }

        let updated = self
            .context
            .database
            .update_event_status(event_id, status)
            .await?;

        self.context.emit(CollabEvent::EventStatusChanged {
            event_id,
            status,
        });

        Ok(updated)
    }

    /// Deletes the event, cascading its votes, tracks, and participants
    pub async fn delete_event(
        &self,
        caller_id: PrimaryKey,
        event_id: PrimaryKey,
    ) -> Result<(), EventError> {
        let participant = self
            .context
            .database
            .participant(event_id, caller_id)
            .await
            .map_err(not_allowed_if_missing)?;

        if participant.role != ParticipantRole::Creator {
            return Err(EventError::NotAllowed);
        }

        self.context.database.delete_event(event_id).await?;
        self.context.emit(CollabEvent::EventDeleted { event_id });

        info!("Event {} deleted by user {}", event_id, caller_id);
        Ok(())
    }

    async fn ensure_can_manage(
        &self,
        event_id: PrimaryKey,
        caller_id: PrimaryKey,
    ) -> Result<(), EventError> {
        let participant = self
            .context
            .database
            .participant(event_id, caller_id)
            .await
            .map_err(not_allowed_if_missing)?;

        if !participant.role.can_manage_event() {
            return Err(EventError::NotAllowed);
        }

        Ok(())
    }
}

fn not_allowed_if_missing(error: DatabaseError) -> EventError {
    if error.is_not_found() {
        EventError::NotAllowed
    } else {
        EventError::Db(error)
    }
}

fn can_transition(from: EventStatus, to: EventStatus) -> bool {
    use EventStatus::*;

    matches!(
        (from, to),
        (Draft, Active)
            | (Draft, Ended)
            | (Active, Paused)
            | (Active, Ended)
            | (Paused, Active)
            | (Paused, Ended)
    )
}

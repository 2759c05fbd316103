use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use encore_collab::{DatabaseError, DelegationError, EventError, PlaylistError, VoteError};
use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{resource}:{identifier} not found")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        resource: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("Too many requests")]
    RateLimited,
    #[error("Unknown internal error: {0}")]
    Unknown(String),
}

impl ServerError {
    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.as_status_code(), self.to_string()).into_response()
    }
}

impl From<DatabaseError> for ServerError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::NotFound {
                resource,
                identifier,
            } => Self::NotFound {
                resource,
                identifier,
            },
            DatabaseError::Conflict {
                resource,
                field,
                value,
            } => Self::Conflict {
                resource,
                field,
                value,
            },
            e => Self::Unknown(e.to_string()),
        }
    }
}

impl From<VoteError> for ServerError {
    fn from(value: VoteError) -> Self {
        match value {
            VoteError::NotParticipant => Self::Forbidden(value.to_string()),
            VoteError::InvalidWeight(_)
            | VoteError::VotingClosed
            | VoteError::VoteLimitReached => Self::InvalidArgument(value.to_string()),
            VoteError::Db(e) => e.into(),
        }
    }
}

impl From<PlaylistError> for ServerError {
    fn from(value: PlaylistError) -> Self {
        match value {
            PlaylistError::NotAllowed => Self::Forbidden(value.to_string()),
            PlaylistError::NotPermutation
            | PlaylistError::PositionOutOfBounds(_)
            | PlaylistError::EventEnded => Self::InvalidArgument(value.to_string()),
            PlaylistError::Db(e) => e.into(),
        }
    }
}

impl From<DelegationError> for ServerError {
    fn from(value: DelegationError) -> Self {
        match value {
            DelegationError::NotOwner => Self::Forbidden(value.to_string()),
            DelegationError::NotControllable | DelegationError::ExpiryInPast => {
                Self::InvalidArgument(value.to_string())
            }
            DelegationError::Db(e) => e.into(),
        }
    }
}

impl From<EventError> for ServerError {
    fn from(value: EventError) -> Self {
        match value {
            EventError::NotAllowed => Self::Forbidden(value.to_string()),
            EventError::InvalidTransition { .. } | EventError::EventEnded => {
                Self::InvalidArgument(value.to_string())
            }
            EventError::PrivateEvent => Self::Forbidden(value.to_string()),
            EventError::Db(e) => e.into(),
        }
    }
}

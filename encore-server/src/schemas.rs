use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use encore_collab::{EventStatus, EventVisibility, Geofence, Permissions, PrimaryKey, VoteKind};
use serde::{de::DeserializeOwned, Deserialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EventStatusSchema {
    Draft,
    Active,
    Paused,
    Ended,
}

impl From<EventStatusSchema> for EventStatus {
    fn from(value: EventStatusSchema) -> Self {
        match value {
            EventStatusSchema::Draft => Self::Draft,
            EventStatusSchema::Active => Self::Active,
            EventStatusSchema::Paused => Self::Paused,
            EventStatusSchema::Ended => Self::Ended,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum VisibilitySchema {
    Public,
    Private,
}

impl From<VisibilitySchema> for EventVisibility {
    fn from(value: VisibilitySchema) -> Self {
        match value {
            VisibilitySchema::Public => Self::Public,
            VisibilitySchema::Private => Self::Private,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum VoteKindSchema {
    Upvote,
    Downvote,
}

impl From<VoteKindSchema> for VoteKind {
    fn from(value: VoteKindSchema) -> Self {
        match value {
            VoteKindSchema::Upvote => Self::Upvote,
            VoteKindSchema::Downvote => Self::Downvote,
        }
    }
}

#[derive(Debug, Clone, Copy, Validate, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GeofenceSchema {
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
    #[validate(range(min = 1.0))]
    pub radius_m: f64,
}

impl From<GeofenceSchema> for Geofence {
    fn from(value: GeofenceSchema) -> Self {
        Geofence {
            latitude: value.latitude,
            longitude: value.longitude,
            radius_m: value.radius_m,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PermissionsSchema {
    #[serde(default)]
    pub can_play: bool,
    #[serde(default)]
    pub can_pause: bool,
    #[serde(default)]
    pub can_skip: bool,
    #[serde(default)]
    pub can_change_volume: bool,
    #[serde(default)]
    pub can_change_playlist: bool,
}

impl From<PermissionsSchema> for Permissions {
    fn from(value: PermissionsSchema) -> Self {
        Permissions {
            can_play: value.can_play,
            can_pause: value.can_pause,
            can_skip: value.can_skip,
            can_change_volume: value.can_change_volume,
            can_change_playlist: value.can_change_playlist,
        }
    }
}

#[derive(Debug, Validate, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewEventSchema {
    #[validate(length(min = 1, max = 128))]
    pub title: String,
    pub visibility: VisibilitySchema,
    #[validate(nested)]
    pub geofence: Option<GeofenceSchema>,
    pub voting_starts_at: Option<DateTime<Utc>>,
    pub voting_ends_at: Option<DateTime<Utc>>,
    #[validate(range(min = 1))]
    pub max_votes_per_user: Option<i32>,
}

#[derive(Debug, Validate, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateStatusSchema {
    pub status: EventStatusSchema,
}

#[derive(Debug, Validate, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AddTrackSchema {
    #[validate(length(min = 1, max = 512))]
    pub track_reference: String,
    #[validate(range(min = 1))]
    pub position: Option<i32>,
}

#[derive(Debug, Validate, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReorderSchema {
    #[validate(length(min = 1))]
    pub ordered_track_ids: Vec<PrimaryKey>,
}

#[derive(Debug, Validate, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CastVoteSchema {
    pub kind: VoteKindSchema,
    #[validate(range(min = 1, max = 5))]
    pub weight: Option<i32>,
}

#[derive(Debug, Validate, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DelegateSchema {
    pub delegate_user_id: PrimaryKey,
    pub permissions: PermissionsSchema,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let extracted_json: Json<T> = Json::from_request(req, state)
            .await
            .map_err(|_| (StatusCode::BAD_REQUEST, "JSON parse failed"))?;

        extracted_json
            .0
            .validate()
            .map_err(|_| (StatusCode::BAD_REQUEST, "Request body is invalid"))?;

        Ok(Self(extracted_json.0))
    }
}

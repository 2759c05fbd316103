use axum::{response::IntoResponse, Json};
use utoipa::OpenApi;

use crate::{devices, events, schemas, serialized, sse, votes};

#[derive(OpenApi)]
#[openapi(
    info(
        description = "encore-server exposes endpoints to interact with this encore instance"
    ),
    paths(
        events::create_event,
        events::event,
        events::update_status,
        events::delete_event,
        events::join,
        events::tally,
        events::add_track,
        events::remove_track,
        events::reorder,
        votes::cast_vote,
        votes::retract_vote,
        devices::delegate,
        devices::revoke,
        devices::authorize,
        sse::event_stream,
        sse::device_stream,
    ),
    components(schemas(
        schemas::NewEventSchema,
        schemas::UpdateStatusSchema,
        schemas::AddTrackSchema,
        schemas::ReorderSchema,
        schemas::CastVoteSchema,
        schemas::DelegateSchema,
        schemas::EventStatusSchema,
        schemas::VisibilitySchema,
        schemas::VoteKindSchema,
        schemas::GeofenceSchema,
        schemas::PermissionsSchema,
        serialized::Event,
        serialized::GeofenceOut,
        serialized::Participant,
        serialized::PlaylistTrack,
        serialized::Vote,
        serialized::VoteResult,
        serialized::TallyEntry,
        serialized::TrackScore,
        serialized::Delegation,
        serialized::PermissionsOut,
        serialized::Authorized,
    ))
)]
pub struct ApiDoc;

pub async fn docs() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

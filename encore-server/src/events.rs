use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, patch, post, put},
    Json,
};
use encore_collab::{Collab, NewEvent, PrimaryKey};

use crate::{
    auth::Caller,
    errors::{ServerError, ServerResult},
    ratelimit::RateLimiter,
    schemas::{AddTrackSchema, NewEventSchema, ReorderSchema, UpdateStatusSchema, ValidatedJson},
    serialized::{Event, Participant, PlaylistTrack, TallyEntry, ToSerialized},
    sse, Router,
};

#[utoipa::path(
    post,
    path = "/v1/events",
    tag = "events",
    request_body = NewEventSchema,
    responses(
        (status = 200, body = Event)
    )
)]
pub(crate) async fn create_event(
    caller: Caller,
    State(collab): State<Arc<Collab>>,
    State(limiter): State<Arc<RateLimiter>>,
    ValidatedJson(body): ValidatedJson<NewEventSchema>,
) -> ServerResult<Json<Event>> {
    if !limiter.check(caller.0, "create_event") {
        return Err(ServerError::RateLimited);
    }

    let event = collab
        .create_event(NewEvent {
            title: body.title,
            visibility: body.visibility.into(),
            geofence: body.geofence.map(Into::into),
            voting_starts_at: body.voting_starts_at,
            voting_ends_at: body.voting_ends_at,
            max_votes_per_user: body.max_votes_per_user,
            created_by: caller.0,
        })
        .await?;

    Ok(Json(event.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/v1/events/{id}",
    tag = "events",
    responses(
        (status = 200, body = Event)
    )
)]
pub(crate) async fn event(
    _caller: Caller,
    State(collab): State<Arc<Collab>>,
    Path(event_id): Path<PrimaryKey>,
) -> ServerResult<Json<Event>> {
    let event = collab.event_by_id(event_id).await?;

    Ok(Json(event.to_serialized()))
}

#[utoipa::path(
    patch,
    path = "/v1/events/{id}/status",
    tag = "events",
    request_body = UpdateStatusSchema,
    responses(
        (status = 200, body = Event)
    )
)]
pub(crate) async fn update_status(
    caller: Caller,
    State(collab): State<Arc<Collab>>,
    State(limiter): State<Arc<RateLimiter>>,
    Path(event_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<UpdateStatusSchema>,
) -> ServerResult<Json<Event>> {
    if !limiter.check(caller.0, "update_status") {
        return Err(ServerError::RateLimited);
    }

    let event = collab
        .set_event_status(caller.0, event_id, body.status.into())
        .await?;

    Ok(Json(event.to_serialized()))
}

#[utoipa::path(
    delete,
    path = "/v1/events/{id}",
    tag = "events",
    responses(
        (status = 204)
    )
)]
pub(crate) async fn delete_event(
    caller: Caller,
    State(collab): State<Arc<Collab>>,
    State(limiter): State<Arc<RateLimiter>>,
    Path(event_id): Path<PrimaryKey>,
) -> ServerResult<StatusCode> {
    if !limiter.check(caller.0, "delete_event") {
        return Err(ServerError::RateLimited);
    }

    collab.delete_event(caller.0, event_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/events/{id}/participants",
    tag = "events",
    responses(
        (status = 200, body = Participant)
    )
)]
pub(crate) async fn join(
    caller: Caller,
    State(collab): State<Arc<Collab>>,
    State(limiter): State<Arc<RateLimiter>>,
    Path(event_id): Path<PrimaryKey>,
) -> ServerResult<Json<Participant>> {
    if !limiter.check(caller.0, "join") {
        return Err(ServerError::RateLimited);
    }

    let participant = collab.join_event(caller.0, event_id).await?;

    Ok(Json(participant.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/v1/events/{id}/tally",
    tag = "events",
    responses(
        (status = 200, body = Vec<TallyEntry>)
    )
)]
pub(crate) async fn tally(
    caller: Caller,
    State(collab): State<Arc<Collab>>,
    Path(event_id): Path<PrimaryKey>,
) -> ServerResult<Json<Vec<TallyEntry>>> {
    let entries = collab.votes.tally_for(event_id, Some(caller.0)).await?;

    Ok(Json(entries.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/v1/events/{id}/tracks",
    tag = "events",
    request_body = AddTrackSchema,
    responses(
        (status = 200, body = PlaylistTrack)
    )
)]
pub(crate) async fn add_track(
    caller: Caller,
    State(collab): State<Arc<Collab>>,
    State(limiter): State<Arc<RateLimiter>>,
    Path(event_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<AddTrackSchema>,
) -> ServerResult<Json<PlaylistTrack>> {
    if !limiter.check(caller.0, "add_track") {
        return Err(ServerError::RateLimited);
    }

    let track = collab
        .playlists
        .add_track(caller.0, event_id, body.track_reference, body.position)
        .await?;

    Ok(Json(track.to_serialized()))
}

#[utoipa::path(
    delete,
    path = "/v1/events/{id}/tracks/{track_id}",
    tag = "events",
    responses(
        (status = 204)
    )
)]
pub(crate) async fn remove_track(
    caller: Caller,
    State(collab): State<Arc<Collab>>,
    State(limiter): State<Arc<RateLimiter>>,
    Path((event_id, track_id)): Path<(PrimaryKey, PrimaryKey)>,
) -> ServerResult<StatusCode> {
    if !limiter.check(caller.0, "remove_track") {
        return Err(ServerError::RateLimited);
    }

    collab
        .playlists
        .remove_track(caller.0, event_id, track_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/v1/events/{id}/tracks",
    tag = "events",
    request_body = ReorderSchema,
    responses(
        (status = 204)
    )
)]
pub(crate) async fn reorder(
    caller: Caller,
    State(collab): State<Arc<Collab>>,
    State(limiter): State<Arc<RateLimiter>>,
    Path(event_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<ReorderSchema>,
) -> ServerResult<StatusCode> {
    if !limiter.check(caller.0, "reorder") {
        return Err(ServerError::RateLimited);
    }

    collab
        .playlists
        .reorder(caller.0, event_id, body.ordered_track_ids)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_event))
        .route("/:id", get(event))
        .route("/:id", delete(delete_event))
        .route("/:id/status", patch(update_status))
        .route("/:id/participants", post(join))
        .route("/:id/tally", get(tally))
        .route("/:id/tracks", post(add_track))
        .route("/:id/tracks", put(reorder))
        .route("/:id/tracks/:track_id", delete(remove_track))
        .route("/:id/stream", get(sse::event_stream))
}

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{delete, put},
    Json,
};
use encore_collab::{Collab, PrimaryKey};

use crate::{
    auth::Caller,
    errors::{ServerError, ServerResult},
    ratelimit::RateLimiter,
    schemas::{CastVoteSchema, ValidatedJson},
    serialized::{ToSerialized, TrackScore, VoteResult},
    Router,
};

#[utoipa::path(
    put,
    path = "/v1/tracks/{id}/vote",
    tag = "votes",
    request_body = CastVoteSchema,
    responses(
        (status = 200, body = VoteResult)
    )
)]
pub(crate) async fn cast_vote(
    caller: Caller,
    State(collab): State<Arc<Collab>>,
    State(limiter): State<Arc<RateLimiter>>,
    Path(track_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<CastVoteSchema>,
) -> ServerResult<Json<VoteResult>> {
    if !limiter.check(caller.0, "cast_vote") {
        return Err(ServerError::RateLimited);
    }

    let result = collab
        .votes
        .cast_vote(caller.0, track_id, body.kind.into(), body.weight)
        .await?;

    Ok(Json(result.to_serialized()))
}

#[utoipa::path(
    delete,
    path = "/v1/tracks/{id}/vote",
    tag = "votes",
    responses(
        (status = 200, body = TrackScore)
    )
)]
pub(crate) async fn retract_vote(
    caller: Caller,
    State(collab): State<Arc<Collab>>,
    State(limiter): State<Arc<RateLimiter>>,
    Path(track_id): Path<PrimaryKey>,
) -> ServerResult<Json<TrackScore>> {
    if !limiter.check(caller.0, "retract_vote") {
        return Err(ServerError::RateLimited);
    }

    let score = collab.votes.retract_vote(caller.0, track_id).await?;

    Ok(Json(TrackScore::new(track_id, score)))
}

pub fn router() -> Router {
    Router::new()
        .route("/:id/vote", put(cast_vote))
        .route("/:id/vote", delete(retract_vote))
}

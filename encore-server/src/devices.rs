use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json,
};
use encore_collab::{Collab, DeviceAction, PrimaryKey};
use serde::Deserialize;

use crate::{
    auth::Caller,
    errors::{ServerError, ServerResult},
    ratelimit::RateLimiter,
    schemas::{DelegateSchema, ValidatedJson},
    serialized::{Authorized, Delegation, ToSerialized},
    sse, Router,
};

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    action: String,
}

#[utoipa::path(
    post,
    path = "/v1/devices/{id}/delegation",
    tag = "devices",
    request_body = DelegateSchema,
    responses(
        (status = 200, body = Delegation)
    )
)]
pub(crate) async fn delegate(
    caller: Caller,
    State(collab): State<Arc<Collab>>,
    State(limiter): State<Arc<RateLimiter>>,
    Path(device_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<DelegateSchema>,
) -> ServerResult<Json<Delegation>> {
    if !limiter.check(caller.0, "delegate") {
        return Err(ServerError::RateLimited);
    }

    let delegation = collab
        .delegations
        .delegate(
            caller.0,
            device_id,
            body.delegate_user_id,
            body.permissions.into(),
            body.expires_at,
        )
        .await?;

    Ok(Json(delegation.to_serialized()))
}

#[utoipa::path(
    delete,
    path = "/v1/devices/{id}/delegation",
    tag = "devices",
    responses(
        (status = 204)
    )
)]
pub(crate) async fn revoke(
    caller: Caller,
    State(collab): State<Arc<Collab>>,
    State(limiter): State<Arc<RateLimiter>>,
    Path(device_id): Path<PrimaryKey>,
) -> ServerResult<StatusCode> {
    if !limiter.check(caller.0, "revoke") {
        return Err(ServerError::RateLimited);
    }

    collab.delegations.revoke(caller.0, device_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/devices/{id}/authorize",
    tag = "devices",
    params(
        ("action" = String, Query, description = "The action to check, such as play or skip")
    ),
    responses(
        (status = 200, body = Authorized)
    )
)]
pub(crate) async fn authorize(
    caller: Caller,
    State(collab): State<Arc<Collab>>,
    Path(device_id): Path<PrimaryKey>,
    Query(query): Query<AuthorizeQuery>,
) -> ServerResult<Json<Authorized>> {
    let action = DeviceAction::from_str(&query.action)
        .ok_or_else(|| ServerError::InvalidArgument(format!("Unknown action {}", query.action)))?;

    let allowed = collab
        .delegations
        .authorize(caller.0, device_id, action)
        .await?;

    Ok(Json(Authorized::new(allowed)))
}

pub fn router() -> Router {
    Router::new()
        .route("/:id/delegation", post(delegate))
        .route("/:id/delegation", delete(revoke))
        .route("/:id/authorize", get(authorize))
        .route("/:id/stream", get(sse::device_stream))
}

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use encore_collab::PrimaryKey;

/// The trusted caller identity.
///
/// Authentication happens upstream of this service; the gateway resolves
/// credentials and forwards the resulting user id in the `x-user-id`
/// header. Requests without it are rejected before reaching a handler.
pub struct Caller(pub PrimaryKey);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|x| x.to_str().ok())
            .and_then(|x| x.parse::<PrimaryKey>().ok())
            .map(Caller)
            .ok_or((StatusCode::UNAUTHORIZED, "Missing or invalid caller id"))
    }
}

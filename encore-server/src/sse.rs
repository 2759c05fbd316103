use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Sse,
    },
};
use encore_collab::{Collab, PrimaryKey, Room};
use futures_util::StreamExt;

use crate::errors::ServerResult;

/// Streams every notification concerning an event: vote tallies, queue
/// changes, and lifecycle transitions. Messages arrive in publish order.
#[utoipa::path(
    get,
    path = "/v1/events/{id}/stream",
    tag = "events",
    responses(
        (status = 200, description = "A server-sent event stream")
    )
)]
pub async fn event_stream(
    State(collab): State<Arc<Collab>>,
    Path(event_id): Path<PrimaryKey>,
) -> ServerResult<impl IntoResponse> {
    collab.event_by_id(event_id).await?;

    let handle = collab.rooms().connect();

    handle.join(Room::Event(event_id));
    handle.join(Room::Playlist(event_id));

    let stream = handle.map(|message| {
        Ok::<_, Infallible>(
            Event::default()
                .event(message.name)
                .data(message.payload.to_string()),
        )
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Streams delegation grants and revocations for a device
#[utoipa::path(
    get,
    path = "/v1/devices/{id}/stream",
    tag = "devices",
    responses(
        (status = 200, description = "A server-sent event stream")
    )
)]
pub async fn device_stream(
    State(collab): State<Arc<Collab>>,
    Path(device_id): Path<PrimaryKey>,
) -> ServerResult<impl IntoResponse> {
    collab.device_by_id(device_id).await?;

    let handle = collab.rooms().connect();
    handle.join(Room::Device(device_id));

    let stream = handle.map(|message| {
        Ok::<_, Infallible>(
            Event::default()
                .event(message.name)
                .data(message.payload.to_string()),
        )
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

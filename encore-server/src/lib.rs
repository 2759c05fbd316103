use std::{
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
};

use axum::routing::get;
use encore_collab::Collab;
use log::info;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

mod auth;
mod context;
mod devices;
mod docs;
mod errors;
mod events;
mod ratelimit;
mod schemas;
mod serialized;
mod sse;
mod votes;

pub mod config;
pub mod logging;

use context::ServerContext;
use ratelimit::RateLimiter;

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 9050;

pub type Router = axum::Router<ServerContext>;

/// Starts the encore server
pub async fn run_server(collab: Arc<Collab>, port: u16) {
    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let context = ServerContext {
        collab,
        limiter: Arc::new(RateLimiter::new()),
    };

    let version_one_router = Router::new()
        .nest("/events", events::router())
        .nest("/tracks", votes::router())
        .nest("/devices", devices::router());

    let root_router = Router::new()
        .nest("/v1", version_one_router)
        .route("/api.json", get(docs::docs))
        .layer(cors)
        .with_state(context);

    let listener = TcpListener::bind(&addr).await.expect("listens on address");

    info!("Listening on port {}", port);

    axum::serve(listener, root_router.into_make_service())
        .await
        .expect("server runs");
}

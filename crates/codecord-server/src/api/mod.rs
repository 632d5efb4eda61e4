//! Public HTTP surface
//!
//! Routes are grouped by the credential they require:
//!
//! - open: server info, ping, avatars, public stream info, join
//! - operator (server token): create stream, mint host token
//! - stream token: participants, service redirect, self-update
//! - host token: join decision, finish, metadata patch

pub mod error;
pub mod handlers;
pub mod models;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth;

pub use handlers::AppState;

/// Create the public router
pub fn create_router(state: Arc<AppState>) -> Router {
    let open = Router::new()
        .route("/", get(handlers::get_server_info))
        .route("/ping", get(handlers::ping))
        .route("/avatar", post(handlers::add_avatar))
        .route("/avatar/{id}", get(handlers::get_avatar))
        .route("/stream/{id}", get(handlers::get_stream_info))
        .route("/stream/{id}/join", post(handlers::join_stream));

    let mut operator = Router::new().route("/stream", post(handlers::create_stream));
    if state.operator_key.is_some() {
        operator = operator.route("/stream/{id}/token", get(handlers::new_auth_token));
    }
    let operator =
        operator.route_layer(middleware::from_fn_with_state(state.clone(), auth::server_auth));

    let participant = Router::new()
        .route(
            "/stream/{id}/participants",
            get(handlers::get_stream_participants),
        )
        .route(
            "/stream/{id}/service/{*route}",
            get(handlers::stream_service_redirect),
        )
        .route(
            "/stream/{id}/participants/me",
            patch(handlers::patch_participant_me),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::stream_auth,
        ));

    let host = Router::new()
        .route(
            "/stream/{id}/participants/{pid}/decision",
            get(handlers::join_participant_decision),
        )
        .route(
            "/stream/{id}",
            delete(handlers::finish_stream).patch(handlers::patch_stream),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::stream_host_auth,
        ));

    open.merge(operator)
        .merge(participant)
        .merge(host)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

//! Administrative HTTP surface
//!
//! A separate listener, bound to loopback by default, for operators: server
//! token minting, the full stream list, forced stream finish and storage
//! backups. It carries no token gate of its own — isolation comes from the
//! loopback binding.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use jsonwebtoken::EncodingKey;
use tower_http::trace::TraceLayer;

use codecord_core::token::{sign_server_token, ServerClaims};
use codecord_core::CoreError;

use crate::api::error::ApiError;
use crate::api::models::{
    build_stream_list_response, GenerateTokenRequest, PingResponse, ServerInfo,
    StreamListQuery, StreamListResponse, TokenResponse,
};
use crate::lifecycle::StreamService;
use crate::storage::Stores;

/// Shared state of the admin surface
pub struct AdminState {
    pub streams: Arc<StreamService>,
    pub stores: Arc<Stores>,
    pub info: ServerInfo,
    /// Operator private key for minting server tokens
    pub signing_key: Option<EncodingKey>,
}

/// Create the admin router
pub fn create_admin_router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/", get(get_server_info))
        .route("/ping", get(ping))
        .route("/token", post(generate_token))
        .route("/stream", get(get_streams))
        .route("/stream/{id}", delete(finish_stream))
        .route("/storage/{name}", get(storage_backup))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /
async fn get_server_info(State(state): State<Arc<AdminState>>) -> Json<ServerInfo> {
    Json(state.info.clone())
}

/// GET /ping
async fn ping() -> Json<PingResponse> {
    Json(PingResponse { message: "pong" })
}

/// POST /token
async fn generate_token(
    State(state): State<Arc<AdminState>>,
    payload: Result<Json<GenerateTokenRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TokenResponse>), ApiError> {
    let Json(request) = payload.map_err(ApiError::invalid_request)?;
    request.validate()?;

    let signing_key = state
        .signing_key
        .as_ref()
        .ok_or_else(|| ApiError::generate_token(CoreError::KeyMissing))?;

    let claims = ServerClaims {
        sub: request.sub,
        aud: request.aud,
        iss: request.iss,
        iat: request.iat.map(|at| at.timestamp()),
        nbf: request.nbf.map(|at| at.timestamp()),
        exp: request.exp.map(|at| at.timestamp()),
    };

    let access_token =
        sign_server_token(signing_key, &claims).map_err(ApiError::generate_token)?;

    Ok((StatusCode::CREATED, Json(TokenResponse { access_token })))
}

/// GET /stream
async fn get_streams(
    State(state): State<Arc<AdminState>>,
    uri: Uri,
) -> Result<Json<StreamListResponse>, ApiError> {
    let filter = StreamListQuery::parse(uri.query().unwrap_or_default())?.into_filter()?;

    let list = state
        .streams
        .stream_list(filter)
        .await
        .map_err(ApiError::stream_list)?;

    Ok(Json(build_stream_list_response(list)))
}

/// DELETE /stream/{id}
async fn finish_stream(
    State(state): State<Arc<AdminState>>,
    Path(stream_uuid): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .streams
        .finish_stream(&stream_uuid)
        .await
        .map_err(ApiError::finish_stream)?;

    Ok(StatusCode::OK)
}

/// GET /storage/{name}
///
/// Streams a consistent backup of the named bucket as an attachment.
async fn storage_backup(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let store = state
        .stores
        .by_name(&name)
        .ok_or_else(|| ApiError::custom(StatusCode::NOT_FOUND, format!("unknown storage: {name}")))?;

    let mut backup = Vec::new();
    store
        .snapshot(&name, &mut backup)
        .await
        .map_err(ApiError::backup_storage)?;

    let file_name = format!(
        "backup_{name}_{}.db",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    );

    Ok((
        [
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={file_name}"),
            ),
            (
                header::CONTENT_TYPE,
                "application/octet-stream".to_owned(),
            ),
        ],
        backup,
    )
        .into_response())
}

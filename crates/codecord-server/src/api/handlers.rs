//! Handlers for the public HTTP surface

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Extension, Json};
use jsonwebtoken::DecodingKey;

use crate::admission::{JoinRequest, PatchParticipantConfig};
use crate::api::error::ApiError;
use crate::api::models::{
    AuthResponse, AvatarResponse, CreateStreamRequest, JoinStreamRequest, JoinStreamResponse,
    ParticipantResponse, PatchParticipantRequest, PatchStreamRequest, PingResponse, ServerInfo,
    StreamOwnerInfoResponse, StreamPublicInfoResponse,
};
use crate::auth::{ParticipantCtx, ServerSubject};
use crate::avatar::AvatarService;
use crate::launcher::LaunchSpec;
use crate::lifecycle::{
    HostConfig, PatchHostConfig, PatchStreamConfig, StreamConfig, StreamService,
};

/// Forwarded-client header honored when resolving participant addresses
const FORWARDED_FOR_HEADER: &str = "X-FORWARDED-FOR";

/// Shared state of the public surface
pub struct AppState {
    pub streams: Arc<StreamService>,
    pub avatars: AvatarService,
    pub info: ServerInfo,
    /// Operator public key; `None` when operator security is disabled
    pub operator_key: Option<DecodingKey>,
}

/// GET /
pub async fn get_server_info(State(state): State<Arc<AppState>>) -> Json<ServerInfo> {
    Json(state.info.clone())
}

/// GET /ping
pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse { message: "pong" })
}

/// POST /avatar
pub async fn add_avatar(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<AvatarResponse>), ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let uuid = state
        .avatars
        .add(content_type, body.to_vec())
        .await
        .map_err(ApiError::avatar)?;

    Ok((StatusCode::CREATED, Json(AvatarResponse { uuid })))
}

/// GET /avatar/{id}
pub async fn get_avatar(
    State(state): State<Arc<AppState>>,
    Path(avatar_uuid): Path<String>,
) -> Result<Response, ApiError> {
    let record = state
        .avatars
        .by_id(&avatar_uuid)
        .await
        .map_err(ApiError::avatar)?;

    Ok((
        [(header::CONTENT_TYPE, record.content_type)],
        record.image_data,
    )
        .into_response())
}

/// GET /stream/{id}
pub async fn get_stream_info(
    State(state): State<Arc<AppState>>,
    Path(stream_uuid): Path<String>,
) -> Result<Json<StreamPublicInfoResponse>, ApiError> {
    let info = state
        .streams
        .stream_info(&stream_uuid)
        .await
        .map_err(ApiError::stream_info)?;

    Ok(Json(info.into()))
}

/// POST /stream
pub async fn create_stream(
    State(state): State<Arc<AppState>>,
    subject: Option<Extension<ServerSubject>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Result<Json<CreateStreamRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StreamOwnerInfoResponse>), ApiError> {
    let Json(request) = payload.map_err(ApiError::invalid_request)?;
    request.validate()?;

    let cfg = StreamConfig {
        name: request.name,
        description: request.description,
        subject: subject.map(|Extension(s)| s.0).unwrap_or_default(),
        join: codecord_core::JoinConfig {
            policy: request.join.policy,
            code: request.join.code,
        },
        launch: LaunchSpec {
            mode: request.stream.mode.unwrap_or_default(),
            preferred_ip: request.stream.ip,
            preferred_port: request.stream.port,
        },
        host: HostConfig {
            username: request.host.username,
            avatar_id: request.host.avatar_id,
            ip: client_ip(&headers, remote),
        },
    };

    let info = state
        .streams
        .new_stream(cfg)
        .await
        .map_err(ApiError::create_stream)?;

    Ok((StatusCode::CREATED, Json(info.into())))
}

/// POST /stream/{id}/join
///
/// For the host-resolve policy the response is held open until the host
/// decides or the request is cancelled.
pub async fn join_stream(
    State(state): State<Arc<AppState>>,
    Path(stream_uuid): Path<String>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Result<Json<JoinStreamRequest>, JsonRejection>,
) -> Result<Json<JoinStreamResponse>, ApiError> {
    let Json(request) = payload.map_err(ApiError::invalid_request)?;

    let decision = state
        .streams
        .join_participant(
            &stream_uuid,
            &request.join_code,
            JoinRequest {
                name: request.name,
                avatar_id: request.avatar_id,
                ip: client_ip(&headers, remote),
            },
        )
        .await
        .map_err(ApiError::join_stream)?;

    Ok(Json(JoinStreamResponse {
        allowed: decision.allowed,
        access_token: decision.access_token,
    }))
}

/// GET /stream/{id}/token
pub async fn new_auth_token(
    State(state): State<Arc<AppState>>,
    subject: Option<Extension<ServerSubject>>,
    Path(stream_uuid): Path<String>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let subject = subject.map(|Extension(s)| s.0).unwrap_or_default();

    let auth = state
        .streams
        .host_token(&stream_uuid, &subject)
        .await
        .map_err(ApiError::stream_token)?;

    Ok((StatusCode::CREATED, Json(auth.into())))
}

/// GET /stream/{id}/participants
pub async fn get_stream_participants(
    State(state): State<Arc<AppState>>,
    Path(stream_uuid): Path<String>,
) -> Result<Json<Vec<ParticipantResponse>>, ApiError> {
    let participants = state
        .streams
        .stream_participants(&stream_uuid)
        .await
        .map_err(ApiError::stream_participants)?;

    Ok(Json(
        participants
            .into_iter()
            .map(ParticipantResponse::from)
            .collect(),
    ))
}

/// GET /stream/{id}/service/{*route}
pub async fn stream_service_redirect(
    State(state): State<Arc<AppState>>,
    Path((stream_uuid, route)): Path<(String, String)>,
) -> Result<Redirect, ApiError> {
    let address = state
        .streams
        .stream_address(&stream_uuid)
        .await
        .map_err(ApiError::stream_info)?;

    Ok(Redirect::permanent(&format!("http://{address}/{route}")))
}

/// PATCH /stream/{id}/participants/me
pub async fn patch_participant_me(
    State(state): State<Arc<AppState>>,
    Extension(participant): Extension<ParticipantCtx>,
    Path(stream_uuid): Path<String>,
    payload: Result<Json<PatchParticipantRequest>, JsonRejection>,
) -> Result<Json<ParticipantResponse>, ApiError> {
    let Json(request) = payload.map_err(ApiError::invalid_request)?;

    let updated = state
        .streams
        .patch_participant(
            &stream_uuid,
            &participant.uuid,
            PatchParticipantConfig {
                name: request.name,
                avatar_id: request.avatar_id,
            },
        )
        .await
        .map_err(ApiError::update_participant)?;

    Ok(Json(updated.into()))
}

/// GET /stream/{id}/participants/{pid}/decision
///
/// Presence of the `allowed` query parameter admits the participant, its
/// absence denies them.
pub async fn join_participant_decision(
    State(state): State<Arc<AppState>>,
    Path((stream_uuid, participant_uuid)): Path<(String, String)>,
    uri: Uri,
) -> Result<StatusCode, ApiError> {
    let allowed = has_query_param(&uri, "allowed");

    state
        .streams
        .decide_participant_join(&stream_uuid, &participant_uuid, allowed)
        .map_err(ApiError::decide_participant_join)?;

    Ok(StatusCode::OK)
}

/// DELETE /stream/{id}
pub async fn finish_stream(
    State(state): State<Arc<AppState>>,
    Path(stream_uuid): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .streams
        .finish_stream(&stream_uuid)
        .await
        .map_err(ApiError::finish_stream)?;

    Ok(StatusCode::OK)
}

/// PATCH /stream/{id}
pub async fn patch_stream(
    State(state): State<Arc<AppState>>,
    Path(stream_uuid): Path<String>,
    payload: Result<Json<PatchStreamRequest>, JsonRejection>,
) -> Result<Json<StreamOwnerInfoResponse>, ApiError> {
    let Json(request) = payload.map_err(ApiError::invalid_request)?;

    let cfg = PatchStreamConfig {
        name: request.name,
        description: request.description,
        join: request.join.map(|join| codecord_core::JoinConfig {
            policy: join.policy,
            code: join.code,
        }),
        host: request.host.map(|host| PatchHostConfig {
            username: host.username,
            avatar_id: host.avatar_id,
        }),
    };

    let info = state
        .streams
        .patch_stream(&stream_uuid, cfg)
        .await
        .map_err(ApiError::update_stream)?;

    Ok(Json(info.into()))
}

/// Resolve the caller's address, honoring the forwarding header
fn client_ip(headers: &HeaderMap, remote: SocketAddr) -> String {
    headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|forwarded| forwarded.to_owned())
        .unwrap_or_else(|| remote.ip().to_string())
}

fn has_query_param(uri: &Uri, name: &str) -> bool {
    uri.query()
        .map(|query| {
            query
                .split('&')
                .any(|pair| pair == name || pair.starts_with(&format!("{name}=")))
        })
        .unwrap_or(false)
}

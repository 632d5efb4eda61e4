//! Token verification middleware
//!
//! Two gates protect the public surface:
//!
//! - the **operator gate** verifies the `X-CODE-CORD-AUTH` header against the
//!   operator's public key and attaches the token subject to the request;
//!   it passes everything through when operator security is disabled;
//! - the **stream gate** verifies a bearer token against the per-stream
//!   public key obtained from the registry, checks that the token was minted
//!   for the stream in the path, and (in its host-only variant) that the
//!   caller is the host.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use codecord_core::token::{verify_server_token, verify_stream_token, StreamClaims};

use crate::api::error::ApiError;
use crate::api::handlers::AppState;

/// Header carrying the operator token
pub const SERVER_AUTH_HEADER: &str = "X-CODE-CORD-AUTH";

const BEARER_PREFIX: &str = "Bearer ";
const BEARER_PREFIX_LOWER: &str = "bearer ";

/// Subject of a verified operator token, attached to the request
#[derive(Debug, Clone)]
pub struct ServerSubject(pub String);

/// Verified participant identity, attached to the request
#[derive(Debug, Clone)]
pub struct ParticipantCtx {
    pub uuid: String,
    pub stream_uuid: String,
    pub is_host: bool,
}

/// Operator gate
pub async fn server_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(public_key) = state.operator_key.as_ref() else {
        return Ok(next.run(request).await);
    };

    let token = request
        .headers()
        .get(SERVER_AUTH_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let claims = verify_server_token(public_key, token).map_err(ApiError::auth)?;
    if claims.sub.is_empty() {
        return Err(ApiError::auth("could not find subject of the token"));
    }

    request.extensions_mut().insert(ServerSubject(claims.sub));

    Ok(next.run(request).await)
}

/// Stream gate
pub async fn stream_auth(
    State(state): State<Arc<AppState>>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    authorize_stream(state, params, request, next, false).await
}

/// Stream gate, host-only variant
pub async fn stream_host_auth(
    State(state): State<Arc<AppState>>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    authorize_stream(state, params, request, next, true).await
}

async fn authorize_stream(
    state: Arc<AppState>,
    params: HashMap<String, String>,
    mut request: Request,
    next: Next,
    host_only: bool,
) -> Result<Response, ApiError> {
    let stream_uuid = params.get("id").cloned().unwrap_or_default();

    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let token = strip_bearer(header);

    let public_key = state
        .streams
        .stream_key(&stream_uuid)
        .map_err(ApiError::auth)?;
    let claims = verify_stream_token(&public_key, token).map_err(ApiError::auth)?;

    let participant = check_claims(claims, &stream_uuid, host_only)?;
    request.extensions_mut().insert(participant);

    Ok(next.run(request).await)
}

fn strip_bearer(header: &str) -> &str {
    header
        .strip_prefix(BEARER_PREFIX)
        .or_else(|| header.strip_prefix(BEARER_PREFIX_LOWER))
        .unwrap_or(header)
}

fn check_claims(
    claims: StreamClaims,
    path_stream_uuid: &str,
    host_only: bool,
) -> Result<ParticipantCtx, ApiError> {
    if claims.stream_uuid != path_stream_uuid {
        return Err(ApiError::forbidden("access denied"));
    }

    if host_only && !claims.host {
        return Err(ApiError::auth(
            "only host of the stream has access to this endpoint",
        ));
    }

    Ok(ParticipantCtx {
        uuid: claims.uuid,
        stream_uuid: claims.stream_uuid,
        is_host: claims.host,
    })
}

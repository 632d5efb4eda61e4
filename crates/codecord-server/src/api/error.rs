//! HTTP error envelope
//!
//! Every error leaves the server as `{code, message, details?}` where `code`
//! identifies the failed operation: `1xxx` request errors, `2xxx` server
//! errors, `3xxx` stream errors. Request-parameter failures carry a
//! per-field detail list.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::avatar::AvatarError;
use crate::error::ServiceError;

// custom errors.
const ERR_CODE_CUSTOM: u16 = 0;

// request errors 1xxx.
const ERR_CODE_INVALID_REQUEST: u16 = 1000;
const ERR_CODE_INVALID_REQUEST_PARAM: u16 = 1001;
const ERR_CODE_AUTH: u16 = 1003;

// server errors 2xxx.
const ERR_CODE_CREATE_STREAM: u16 = 2001;
const ERR_CODE_FINISH_STREAM: u16 = 2002;
const ERR_CODE_UPDATE_STREAM: u16 = 2003;
const ERR_CODE_GENERATE_TOKEN: u16 = 2004;
const ERR_CODE_STREAM_LIST: u16 = 2005;
const ERR_CODE_BACKUP_STORAGE: u16 = 2006;
const ERR_CODE_UPDATE_PARTICIPANT: u16 = 2007;

// stream errors 3xxx.
const ERR_CODE_JOIN_STREAM: u16 = 3000;
const ERR_CODE_FETCH_STREAM_PARTICIPANTS: u16 = 3001;
const ERR_CODE_DECIDE_PARTICIPANT_JOIN: u16 = 3002;
const ERR_CODE_GENERATE_STREAM_TOKEN: u16 = 3003;
const ERR_CODE_STREAM_INFO: u16 = 3004;

/// Per-field detail of a request validation failure
#[derive(Debug, Serialize)]
pub struct ParamError {
    pub param: String,
    pub errors: Vec<String>,
}

/// API error carrying its HTTP status and wire envelope
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: u16,
    message: &'static str,
    details: Option<Value>,
}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl ApiError {
    fn new(status: StatusCode, code: u16, message: &'static str, details: Option<Value>) -> Self {
        Self {
            status,
            code,
            message,
            details,
        }
    }

    /// Malformed request body or query string
    pub fn invalid_request(details: impl ToString) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ERR_CODE_INVALID_REQUEST,
            "invalid request",
            Some(Value::String(details.to_string())),
        )
    }

    /// Request failed semantic validation
    pub fn invalid_params(params: Vec<ParamError>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ERR_CODE_INVALID_REQUEST_PARAM,
            "invalid param",
            serde_json::to_value(params).ok(),
        )
    }

    /// Missing, malformed or unverifiable credentials
    pub fn auth(details: impl ToString) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            ERR_CODE_AUTH,
            "could not authorize request",
            Some(Value::String(details.to_string())),
        )
    }

    /// Valid credentials for the wrong stream
    pub fn forbidden(details: impl ToString) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            ERR_CODE_AUTH,
            "could not authorize request",
            Some(Value::String(details.to_string())),
        )
    }

    /// Anything without an operation-specific envelope
    pub fn custom(status: StatusCode, details: impl ToString) -> Self {
        Self::new(
            status,
            ERR_CODE_CUSTOM,
            "unexpected error",
            Some(Value::String(details.to_string())),
        )
    }

    pub fn create_stream(err: ServiceError) -> Self {
        Self::service(ERR_CODE_CREATE_STREAM, "could not create stream", err)
    }

    pub fn finish_stream(err: ServiceError) -> Self {
        Self::service(ERR_CODE_FINISH_STREAM, "could not finish stream", err)
    }

    pub fn update_stream(err: ServiceError) -> Self {
        Self::service(ERR_CODE_UPDATE_STREAM, "could not update stream info", err)
    }

    pub fn generate_token(details: impl ToString) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ERR_CODE_GENERATE_TOKEN,
            "could not generate new access token",
            Some(Value::String(details.to_string())),
        )
    }

    pub fn stream_list(err: ServiceError) -> Self {
        Self::service(ERR_CODE_STREAM_LIST, "could not fetch stream list", err)
    }

    pub fn backup_storage(details: impl ToString) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ERR_CODE_BACKUP_STORAGE,
            "could not create storage backup",
            Some(Value::String(details.to_string())),
        )
    }

    pub fn update_participant(err: ServiceError) -> Self {
        Self::service(
            ERR_CODE_UPDATE_PARTICIPANT,
            "could not update participant info",
            err,
        )
    }

    pub fn join_stream(err: ServiceError) -> Self {
        Self::service(ERR_CODE_JOIN_STREAM, "could not join the stream", err)
    }

    pub fn stream_participants(err: ServiceError) -> Self {
        Self::service(
            ERR_CODE_FETCH_STREAM_PARTICIPANTS,
            "could not fetch list of stream participants",
            err,
        )
    }

    pub fn decide_participant_join(err: ServiceError) -> Self {
        Self::service(
            ERR_CODE_DECIDE_PARTICIPANT_JOIN,
            "could not change participant join status",
            err,
        )
    }

    pub fn stream_token(err: ServiceError) -> Self {
        Self::service(
            ERR_CODE_GENERATE_STREAM_TOKEN,
            "could not generate access token",
            err,
        )
    }

    pub fn stream_info(err: ServiceError) -> Self {
        Self::service(ERR_CODE_STREAM_INFO, "could not get stream info", err)
    }

    pub fn avatar(err: AvatarError) -> Self {
        let status = match &err {
            AvatarError::NotFound(_) => StatusCode::NOT_FOUND,
            AvatarError::UnsupportedType(_) | AvatarError::TooLarge(_) => StatusCode::BAD_REQUEST,
            AvatarError::Storage(_) | AvatarError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::custom(status, err)
    }

    fn service(code: u16, message: &'static str, err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::StreamNotFound(_) | ServiceError::ParticipantNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ServiceError::SubjectMismatch => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, code, message, Some(Value::String(err.to_string())))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code,
            message: self.message,
            details: self.details,
        };

        (self.status, Json(body)).into_response()
    }
}

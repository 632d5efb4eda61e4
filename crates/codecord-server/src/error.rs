//! Service-layer errors

use thiserror::Error;

use codecord_core::CoreError;

use crate::launcher::LaunchError;
use crate::rpc::RpcError;
use crate::storage::StorageError;

/// Errors surfaced by the stream service
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("could not find running stream by UUID {0}")]
    StreamNotFound(String),

    #[error("could not find pending participant by UUID {0}")]
    ParticipantNotFound(String),

    #[error("could not start stream: {0}")]
    StreamStart(String),

    #[error("invalid join code")]
    InvalidJoinCode,

    #[error("join cancelled before the host resolved it")]
    JoinCancelled,

    #[error("could not verify stream subject")]
    SubjectMismatch,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("could not decode stored data: {0}")]
    Serialization(String),

    #[error(transparent)]
    Token(#[from] CoreError),

    #[error(transparent)]
    Transport(#[from] RpcError),

    #[error("unexpected error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Serialization(err.to_string())
    }
}

impl From<LaunchError> for ServiceError {
    fn from(err: LaunchError) -> Self {
        ServiceError::StreamStart(err.to_string())
    }
}

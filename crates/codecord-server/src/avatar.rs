//! Avatar service
//!
//! Stores and serves avatar image blobs. The control plane treats images as
//! opaque bytes; only the content type and an optional size cap are checked.

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use codecord_core::AvatarRecord;

use crate::storage::{StorageError, Stores, AVATAR_BUCKET};

const PNG_CONTENT_TYPE: &str = "image/png";
const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Errors raised by the avatar service
#[derive(Debug, Error)]
pub enum AvatarError {
    #[error("unsupported image type: {0}")]
    UnsupportedType(String),

    #[error("image exceeds the maximum size of {0} bytes")]
    TooLarge(u64),

    #[error("avatar not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("could not decode avatar data: {0}")]
    Serialization(String),
}

/// Storage-backed avatar service
#[derive(Clone)]
pub struct AvatarService {
    stores: Arc<Stores>,
    max_size: Option<u64>,
}

impl AvatarService {
    pub fn new(stores: Arc<Stores>, max_size: Option<u64>) -> Self {
        Self { stores, max_size }
    }

    /// Store a new avatar image and return its UUID
    pub async fn add(&self, content_type: &str, image_data: Vec<u8>) -> Result<String, AvatarError> {
        if content_type != PNG_CONTENT_TYPE && content_type != JPEG_CONTENT_TYPE {
            return Err(AvatarError::UnsupportedType(content_type.to_owned()));
        }

        if let Some(max_size) = self.max_size {
            if image_data.len() as u64 > max_size {
                return Err(AvatarError::TooLarge(max_size));
            }
        }

        let uuid = Uuid::new_v4().to_string();
        let record = AvatarRecord {
            uuid: uuid.clone(),
            image_data,
            content_type: content_type.to_owned(),
        };
        let bytes = serde_json::to_vec(&record)
            .map_err(|err| AvatarError::Serialization(err.to_string()))?;

        self.stores.avatar.put(AVATAR_BUCKET, &uuid, &bytes).await?;

        Ok(uuid)
    }

    /// Load an avatar by UUID
    pub async fn by_id(&self, avatar_uuid: &str) -> Result<AvatarRecord, AvatarError> {
        let bytes = self
            .stores
            .avatar
            .get(AVATAR_BUCKET, avatar_uuid)
            .await?
            .ok_or_else(|| AvatarError::NotFound(avatar_uuid.to_owned()))?;

        serde_json::from_slice(&bytes).map_err(|err| AvatarError::Serialization(err.to_string()))
    }
}

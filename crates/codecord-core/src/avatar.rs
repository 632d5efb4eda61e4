//! Avatar records
//!
//! Avatars are opaque image blobs keyed by UUID; the control plane never
//! inspects the pixels, it only stores and serves them.

use serde::{Deserialize, Serialize};

/// Persisted avatar blob
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarRecord {
    pub uuid: String,
    #[serde(rename = "img")]
    pub image_data: Vec<u8>,
    #[serde(rename = "ct")]
    pub content_type: String,
}

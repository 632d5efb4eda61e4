//! Participant entities
//!
//! Participants are persisted as a JSON list keyed by stream UUID. Only
//! admitted participants reach the store; a pending host-resolve join lives
//! solely in the stream's runtime until the host decides.

use serde::{Deserialize, Serialize};

/// Admission status of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Pending,
    Active,
    Blocked,
}

/// A stream participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub uuid: String,
    pub name: String,
    #[serde(rename = "avatar", default, skip_serializing_if = "String::is_empty")]
    pub avatar_id: String,
    pub ip: String,
    pub status: ParticipantStatus,
}

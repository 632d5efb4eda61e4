//! Request and response models for both HTTP surfaces

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use codecord_core::{
    JoinPolicy, LaunchMode, Participant, ParticipantStatus, StreamRecord, StreamStatus,
};

use crate::api::error::{ApiError, ParamError};
use crate::lifecycle::{
    AuthInfo, SortField, SortOrder, StreamFilter, StreamList, StreamOwnerInfo, StreamPublicInfo,
};

const DEFAULT_PAGE_NUMBER: usize = 1;
const DEFAULT_PAGE_SIZE: usize = 10;

// =============================================================================
// Server info
// =============================================================================

/// Static identity of the server, shown on both surfaces
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub description: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub message: &'static str,
}

// =============================================================================
// Stream requests
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateStreamRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub join: JoinPolicyRequest,
    #[serde(default)]
    pub stream: StreamLaunchRequest,
    pub host: StreamHostRequest,
}

#[derive(Debug, Deserialize)]
pub struct JoinPolicyRequest {
    #[serde(default)]
    pub policy: JoinPolicy,
    #[serde(default)]
    pub code: String,
}

impl Default for JoinPolicyRequest {
    fn default() -> Self {
        Self {
            policy: JoinPolicy::Auto,
            code: String::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamLaunchRequest {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default, rename = "launch")]
    pub mode: Option<LaunchMode>,
}

#[derive(Debug, Deserialize)]
pub struct StreamHostRequest {
    #[serde(rename = "userName", alias = "name")]
    pub username: String,
    #[serde(default, rename = "avatarId")]
    pub avatar_id: String,
}

impl CreateStreamRequest {
    /// Semantic validation; serde already rejected malformed shapes
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut params = Vec::new();

        if self.name.trim().is_empty() {
            params.push(ParamError {
                param: "name".into(),
                errors: vec!["cannot be blank".into()],
            });
        }
        if self.host.username.trim().is_empty() {
            params.push(ParamError {
                param: "host.userName".into(),
                errors: vec!["cannot be blank".into()],
            });
        }
        match self.join.policy {
            JoinPolicy::ByCode => {
                if self.join.code.is_empty() {
                    params.push(ParamError {
                        param: "join.code".into(),
                        errors: vec!["required for the by_code policy".into()],
                    });
                }
            }
            _ => {
                if !self.join.code.is_empty() {
                    params.push(ParamError {
                        param: "join.code".into(),
                        errors: vec!["only allowed for the by_code policy".into()],
                    });
                }
            }
        }

        if params.is_empty() {
            Ok(())
        } else {
            Err(ApiError::invalid_params(params))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PatchStreamRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub join: Option<JoinPolicyRequest>,
    #[serde(default)]
    pub host: Option<PatchHostRequest>,
}

#[derive(Debug, Deserialize)]
pub struct PatchHostRequest {
    #[serde(rename = "userName", alias = "name")]
    pub username: String,
    #[serde(default, rename = "avatarId")]
    pub avatar_id: String,
}

#[derive(Debug, Deserialize)]
pub struct JoinStreamRequest {
    pub name: String,
    #[serde(default, rename = "avatarId")]
    pub avatar_id: String,
    #[serde(default, rename = "joinCode")]
    pub join_code: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PatchParticipantRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "avatarId")]
    pub avatar_id: Option<String>,
}

// =============================================================================
// Stream responses
// =============================================================================

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "type")]
    pub token_type: &'static str,
}

impl From<AuthInfo> for AuthResponse {
    fn from(auth: AuthInfo) -> Self {
        Self {
            access_token: auth.access_token,
            token_type: auth.token_type,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StreamOwnerInfoResponse {
    pub uuid: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "joinPolicy")]
    pub join_policy: JoinPolicy,
    #[serde(rename = "joinCode", skip_serializing_if = "String::is_empty")]
    pub join_code: String,
    pub ip: String,
    pub port: u16,
    #[serde(rename = "launchMode")]
    pub launch_mode: LaunchMode,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    pub host: HostOwnerInfoResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthResponse>,
}

#[derive(Debug, Serialize)]
pub struct HostOwnerInfoResponse {
    pub uuid: String,
    #[serde(rename = "userName")]
    pub username: String,
    #[serde(rename = "avatarId", skip_serializing_if = "String::is_empty")]
    pub avatar_id: String,
    pub ip: String,
}

impl From<StreamOwnerInfo> for StreamOwnerInfoResponse {
    fn from(info: StreamOwnerInfo) -> Self {
        Self {
            uuid: info.uuid,
            name: info.name,
            description: info.description,
            join_policy: info.join_policy,
            join_code: info.join_code,
            ip: info.ip,
            port: info.port,
            launch_mode: info.launch_mode,
            started_at: info.started_at,
            host: HostOwnerInfoResponse {
                uuid: info.host.uuid,
                username: info.host.username,
                avatar_id: info.host.avatar_id,
                ip: info.host.ip,
            },
            auth: info.auth.map(AuthResponse::from),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StreamPublicInfoResponse {
    pub uuid: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "joinPolicy")]
    pub join_policy: JoinPolicy,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "finishedAt", skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<StreamPublicInfo> for StreamPublicInfoResponse {
    fn from(info: StreamPublicInfo) -> Self {
        Self {
            uuid: info.uuid,
            name: info.name,
            description: info.description,
            join_policy: info.join_policy,
            started_at: info.started_at,
            finished_at: info.finished_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JoinStreamResponse {
    pub allowed: bool,
    #[serde(rename = "accessToken", skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ParticipantResponse {
    pub uuid: String,
    pub name: String,
    #[serde(rename = "avatarId", skip_serializing_if = "String::is_empty")]
    pub avatar_id: String,
    pub ip: String,
    pub status: ParticipantStatus,
}

impl From<Participant> for ParticipantResponse {
    fn from(participant: Participant) -> Self {
        Self {
            uuid: participant.uuid,
            name: participant.name,
            avatar_id: participant.avatar_id,
            ip: participant.ip,
            status: participant.status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AvatarResponse {
    pub uuid: String,
}

// =============================================================================
// Admin surface
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct GenerateTokenRequest {
    pub sub: String,
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub iat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub nbf: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exp: Option<DateTime<Utc>>,
}

impl GenerateTokenRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.sub.len() < 10 || self.sub.len() > 64 {
            return Err(ApiError::invalid_params(vec![ParamError {
                param: "sub".into(),
                errors: vec!["the length must be between 10 and 64".into()],
            }]));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    #[serde(rename = "accessToken")]
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct StreamListResponse {
    pub streams: Vec<StreamInfoResponse>,
    pub page: usize,
    #[serde(rename = "pageSize")]
    pub page_size: usize,
    pub count: usize,
    #[serde(rename = "hasNext")]
    pub has_next: bool,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct StreamInfoResponse {
    pub uuid: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub ip: String,
    pub port: u16,
    #[serde(rename = "launchMode")]
    pub launch_mode: LaunchMode,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "finishedAt", skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: StreamStatus,
    pub join: StreamJoinConfigResponse,
    pub host: HostOwnerInfoResponse,
}

#[derive(Debug, Serialize)]
pub struct StreamJoinConfigResponse {
    pub policy: JoinPolicy,
    #[serde(rename = "code", skip_serializing_if = "String::is_empty")]
    pub join_code: String,
}

impl From<StreamRecord> for StreamInfoResponse {
    fn from(record: StreamRecord) -> Self {
        Self {
            uuid: record.uuid,
            name: record.name,
            description: record.description,
            ip: record.ip,
            port: record.port,
            launch_mode: record.launch_mode,
            started_at: record.started_at,
            finished_at: record.finished_at,
            status: record.status,
            join: StreamJoinConfigResponse {
                policy: record.join.policy,
                join_code: record.join.code,
            },
            host: HostOwnerInfoResponse {
                uuid: record.host.uuid,
                username: record.host.username,
                avatar_id: record.host.avatar_id,
                ip: record.host.ip,
            },
        }
    }
}

pub fn build_stream_list_response(list: StreamList) -> StreamListResponse {
    StreamListResponse {
        page: list.page,
        page_size: list.page_size,
        count: list.count,
        has_next: list.has_next,
        total: list.total,
        streams: list
            .streams
            .into_iter()
            .map(StreamInfoResponse::from)
            .collect(),
    }
}

// =============================================================================
// Stream list query
// =============================================================================

/// Stream list query string, built Go-style from raw key/value pairs so that
/// repeated `mode` and `status` parameters accumulate
#[derive(Debug, Default)]
pub struct StreamListQuery {
    pub term: String,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page_size: Option<String>,
    pub page: Option<String>,
    pub modes: Vec<String>,
    pub statuses: Vec<String>,
}

impl StreamListQuery {
    pub fn parse(query: &str) -> Result<Self, ApiError> {
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_str(query).map_err(ApiError::invalid_request)?;

        let mut parsed = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "term" => parsed.term = value,
                "sortBy" => parsed.sort_by = Some(value),
                "sortOrder" => parsed.sort_order = Some(value),
                "pageSize" => parsed.page_size = Some(value),
                "page" => parsed.page = Some(value),
                "mode" => parsed.modes.push(value),
                "status" => parsed.statuses.push(value),
                _ => {}
            }
        }

        Ok(parsed)
    }

    /// Validate and resolve into a service-level filter
    pub fn into_filter(self) -> Result<StreamFilter, ApiError> {
        let mut params = Vec::new();

        let sort_by = match self.sort_by.as_deref() {
            None | Some("") => SortField::default(),
            Some(value) => value.parse().unwrap_or_else(|err| {
                params.push(ParamError {
                    param: "sortBy".into(),
                    errors: vec![err],
                });
                SortField::default()
            }),
        };

        let sort_order = match self.sort_order.as_deref() {
            None | Some("") => SortOrder::default(),
            Some(value) => value.parse().unwrap_or_else(|err| {
                params.push(ParamError {
                    param: "sortOrder".into(),
                    errors: vec![err],
                });
                SortOrder::default()
            }),
        };

        let page_size = parse_positive(self.page_size.as_deref(), DEFAULT_PAGE_SIZE)
            .unwrap_or_else(|err| {
                params.push(ParamError {
                    param: "pageSize".into(),
                    errors: vec![err],
                });
                DEFAULT_PAGE_SIZE
            });
        let page =
            parse_positive(self.page.as_deref(), DEFAULT_PAGE_NUMBER).unwrap_or_else(|err| {
                params.push(ParamError {
                    param: "page".into(),
                    errors: vec![err],
                });
                DEFAULT_PAGE_NUMBER
            });

        let mut launch_modes = Vec::new();
        for mode in &self.modes {
            match serde_json::from_value::<LaunchMode>(serde_json::Value::String(mode.clone())) {
                Ok(mode) => launch_modes.push(mode),
                Err(_) => params.push(ParamError {
                    param: "mode".into(),
                    errors: vec![format!("unknown launch mode: {mode}")],
                }),
            }
        }

        let mut statuses = Vec::new();
        for status in &self.statuses {
            match serde_json::from_value::<StreamStatus>(serde_json::Value::String(status.clone()))
            {
                Ok(status) => statuses.push(status),
                Err(_) => params.push(ParamError {
                    param: "status".into(),
                    errors: vec![format!("unknown status: {status}")],
                }),
            }
        }

        if !params.is_empty() {
            return Err(ApiError::invalid_params(params));
        }

        Ok(StreamFilter {
            search_phrase: self.term,
            launch_modes,
            statuses,
            sort_by,
            sort_order,
            page_size,
            page,
        })
    }
}

fn parse_positive(value: Option<&str>, default: usize) -> Result<usize, String> {
    match value {
        None | Some("") => Ok(default),
        Some(raw) => match raw.parse::<usize>() {
            Ok(parsed) if parsed >= 1 => Ok(parsed),
            Ok(_) => Err("must be no less than 1".into()),
            Err(err) => Err(err.to_string()),
        },
    }
}

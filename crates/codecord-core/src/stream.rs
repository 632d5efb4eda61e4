//! Stream entities shared between the control plane and its HTTP surfaces
//!
//! The wire names (`uuid`, `desc`, `mode`, `startedAt`, ...) are the
//! persisted JSON representation; a stream row is stored as one JSON blob
//! keyed by its UUID.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How participants are admitted to a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinPolicy {
    /// Everyone is admitted immediately
    #[serde(rename = "auto")]
    Auto,
    /// Admission requires the stream's join code
    #[serde(rename = "by_code")]
    ByCode,
    /// The host resolves every join request
    #[serde(rename = "host_resolve")]
    HostResolve,
}

impl Default for JoinPolicy {
    fn default() -> Self {
        JoinPolicy::Auto
    }
}

impl JoinPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinPolicy::Auto => "auto",
            JoinPolicy::ByCode => "by_code",
            JoinPolicy::HostResolve => "host_resolve",
        }
    }
}

/// How the stream worker is launched
///
/// `singleton_app` is accepted as a legacy alias for `standalone_app` on
/// ingress; persistence always uses the canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaunchMode {
    #[serde(rename = "standalone_app", alias = "singleton_app")]
    StandaloneApp,
    #[serde(rename = "docker_container")]
    DockerContainer,
}

impl Default for LaunchMode {
    fn default() -> Self {
        LaunchMode::StandaloneApp
    }
}

impl LaunchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchMode::StandaloneApp => "standalone_app",
            LaunchMode::DockerContainer => "docker_container",
        }
    }
}

/// Lifecycle status of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamStatus {
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "finished")]
    Finished,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Running => "running",
            StreamStatus::Finished => "finished",
        }
    }
}

/// Join configuration of a stream
///
/// `code` is only meaningful (and only persisted) for the `by_code` policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
    #[serde(default)]
    pub policy: JoinPolicy,
}

/// Identity of the stream host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostInfo {
    pub uuid: String,
    #[serde(rename = "name")]
    pub username: String,
    #[serde(rename = "avatar", default, skip_serializing_if = "String::is_empty")]
    pub avatar_id: String,
    pub ip: String,
}

/// Persisted stream row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRecord {
    pub uuid: String,
    pub name: String,
    #[serde(rename = "desc", default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub ip: String,
    pub port: u16,
    #[serde(rename = "mode")]
    pub launch_mode: LaunchMode,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "finishedAt", default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(rename = "sub", default, skip_serializing_if = "String::is_empty")]
    pub subject: String,
    pub status: StreamStatus,
    pub join: JoinConfig,
    pub host: HostInfo,
}

impl StreamRecord {
    /// Move the row to its terminal state
    ///
    /// Returns false when the row was already finished; callers use this to
    /// keep the running → finished transition single-shot.
    pub fn finish(&mut self, at: DateTime<Utc>) -> bool {
        if self.status == StreamStatus::Finished {
            return false;
        }
        self.status = StreamStatus::Finished;
        self.finished_at = Some(at);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_mode_legacy_alias() {
        let mode: LaunchMode = serde_json::from_str("\"singleton_app\"").unwrap();
        assert_eq!(mode, LaunchMode::StandaloneApp);
        assert_eq!(serde_json::to_string(&mode).unwrap(), "\"standalone_app\"");
    }

    #[test]
    fn test_finish_is_single_shot() {
        let mut record = StreamRecord {
            uuid: "s-1".into(),
            name: "demo".into(),
            description: String::new(),
            ip: "127.0.0.1".into(),
            port: 4000,
            launch_mode: LaunchMode::StandaloneApp,
            started_at: Utc::now(),
            finished_at: None,
            subject: String::new(),
            status: StreamStatus::Running,
            join: JoinConfig::default(),
            host: HostInfo::default(),
        };

        let first = Utc::now();
        assert!(record.finish(first));
        assert!(!record.finish(Utc::now()));
        assert_eq!(record.finished_at, Some(first));
    }

    #[test]
    fn test_join_code_skipped_when_empty() {
        let join = JoinConfig {
            code: String::new(),
            policy: JoinPolicy::Auto,
        };
        let encoded = serde_json::to_string(&join).unwrap();
        assert!(!encoded.contains("code"));
    }
}

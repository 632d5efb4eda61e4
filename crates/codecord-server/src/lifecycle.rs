//! Stream lifecycle orchestration
//!
//! The stream service owns the registry and the persistent stores and drives
//! every state transition:
//!
//! ```text
//!    [absent] --create-->  running
//!     running --finish or interrupt-->  finished
//!     running --patch-->  running   (metadata only)
//!     finished -- (terminal) --
//! ```
//!
//! `create` spins up a worker, proves readiness through the RPC dial, then
//! persists the row and registers the runtime. `finish` and the interrupt
//! watcher share one teardown path, `kill_stream`, serialized per stream by
//! the registry's load-and-remove.

use std::sync::{Arc, Weak};

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use codecord_core::token::{self, TOKEN_TYPE_BEARER};
use codecord_core::{
    HostInfo, JoinConfig, JoinPolicy, LaunchMode, RsaKeyPair, StreamRecord, StreamStatus,
};

use crate::error::ServiceError;
use crate::launcher::{LaunchSpec, WorkerFactory};
use crate::registry::{StreamRegistry, StreamRuntime};
use crate::rpc::{RpcLink, DIAL_RETRY_COUNT};
use crate::storage::{Stores, STREAM_BUCKET};

/// Stream creation parameters, already validated by the HTTP layer
#[derive(Debug, Clone, Default)]
pub struct StreamConfig {
    pub name: String,
    pub description: String,
    pub subject: String,
    pub join: JoinConfig,
    pub launch: LaunchSpec,
    pub host: HostConfig,
}

/// Host identity supplied at creation time
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    pub username: String,
    pub avatar_id: String,
    pub ip: String,
}

/// Metadata patch; only present fields are overlaid
#[derive(Debug, Clone, Default)]
pub struct PatchStreamConfig {
    pub name: Option<String>,
    pub description: Option<String>,
    pub join: Option<JoinConfig>,
    pub host: Option<PatchHostConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct PatchHostConfig {
    pub username: String,
    pub avatar_id: String,
}

/// Issued access token plus its type
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub access_token: String,
    pub token_type: &'static str,
}

/// Owner-facing stream summary returned from create and patch
#[derive(Debug, Clone)]
pub struct StreamOwnerInfo {
    pub uuid: String,
    pub name: String,
    pub description: String,
    pub join_policy: JoinPolicy,
    pub join_code: String,
    pub ip: String,
    pub port: u16,
    pub launch_mode: LaunchMode,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub host: HostInfo,
    pub auth: Option<AuthInfo>,
}

/// Public stream projection (no addresses, no host identity)
#[derive(Debug, Clone)]
pub struct StreamPublicInfo {
    pub uuid: String,
    pub name: String,
    pub description: String,
    pub join_policy: JoinPolicy,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Field the stream list is sorted by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    Uuid,
    Name,
    LaunchMode,
    StartedAt,
    Status,
}

impl std::str::FromStr for SortField {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "uuid" => Ok(SortField::Uuid),
            "name" => Ok(SortField::Name),
            "launchMode" => Ok(SortField::LaunchMode),
            "startedAt" => Ok(SortField::StartedAt),
            "status" => Ok(SortField::Status),
            other => Err(format!("unknown sort field: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order: {other}")),
        }
    }
}

/// Stream list filter, sorting and pagination
#[derive(Debug, Clone)]
pub struct StreamFilter {
    pub search_phrase: String,
    pub launch_modes: Vec<LaunchMode>,
    pub statuses: Vec<StreamStatus>,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub page_size: usize,
    pub page: usize,
}

impl Default for StreamFilter {
    fn default() -> Self {
        Self {
            search_phrase: String::new(),
            launch_modes: Vec::new(),
            statuses: Vec::new(),
            sort_by: SortField::default(),
            sort_order: SortOrder::default(),
            page_size: 10,
            page: 1,
        }
    }
}

/// One page of the filtered stream list
#[derive(Debug)]
pub struct StreamList {
    pub streams: Vec<StreamRecord>,
    pub count: usize,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub has_next: bool,
}

/// The stream lifecycle and access-control engine
pub struct StreamService {
    registry: Arc<StreamRegistry>,
    stores: Arc<Stores>,
    factory: Arc<dyn WorkerFactory>,
    dial_attempts: u32,
    /// Handed to interrupt watchers so they never keep the service alive
    weak_self: Weak<StreamService>,
}

impl StreamService {
    pub fn new(
        registry: Arc<StreamRegistry>,
        stores: Arc<Stores>,
        factory: Arc<dyn WorkerFactory>,
    ) -> Arc<Self> {
        Self::with_dial_attempts(registry, stores, factory, DIAL_RETRY_COUNT)
    }

    /// Build with an explicit worker dial retry count (shortens failure
    /// tests)
    pub fn with_dial_attempts(
        registry: Arc<StreamRegistry>,
        stores: Arc<Stores>,
        factory: Arc<dyn WorkerFactory>,
        dial_attempts: u32,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            registry,
            stores,
            factory,
            dial_attempts,
            weak_self: weak.clone(),
        })
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    pub(crate) fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    /// Start a new stream
    ///
    /// Any failure after the worker started stops it again: a worker that
    /// never reached registry insertion must not outlive the call.
    pub async fn new_stream(&self, cfg: StreamConfig) -> Result<StreamOwnerInfo, ServiceError> {
        let keys = tokio::task::spawn_blocking(RsaKeyPair::generate)
            .await
            .map_err(|err| ServiceError::Internal(err.to_string()))??;

        let stream_uuid = Uuid::new_v4().to_string();
        let host_uuid = Uuid::new_v4().to_string();

        let host_token = token::sign_stream_token(&keys, &stream_uuid, &host_uuid, true)?;

        let mut worker = self.factory.build(&stream_uuid, &cfg.launch)?;
        let address = worker.start().await?;

        let rpc = match RpcLink::dial(&address.to_string(), self.dial_attempts).await {
            Ok(link) => link,
            Err(err) => {
                if let Err(stop_err) = worker.stop().await {
                    error!(stream_uuid = %stream_uuid, error = %stop_err, "could not stop stream worker");
                }
                return Err(ServiceError::StreamStart(format!(
                    "could not connect to the running stream: {err}"
                )));
            }
        };

        let interrupts = worker.take_interrupts();

        let record = StreamRecord {
            uuid: stream_uuid.clone(),
            name: cfg.name,
            description: cfg.description,
            ip: address.ip.clone(),
            port: address.port,
            launch_mode: cfg.launch.mode,
            started_at: Utc::now(),
            finished_at: None,
            subject: cfg.subject,
            status: StreamStatus::Running,
            join: cfg.join,
            host: HostInfo {
                uuid: host_uuid,
                username: cfg.host.username,
                avatar_id: cfg.host.avatar_id,
                ip: cfg.host.ip,
            },
        };

        if let Err(err) = self.store_stream(&record).await {
            rpc.close().await;
            if let Err(stop_err) = worker.stop().await {
                error!(stream_uuid = %stream_uuid, error = %stop_err, "could not stop stream worker");
            }
            return Err(err);
        }

        self.registry.insert(Arc::new(StreamRuntime::new(
            stream_uuid.clone(),
            worker,
            rpc,
            keys,
        )));

        if let Some(interrupt_rx) = interrupts {
            // the watcher holds only the stream id and a weak service handle;
            // it must not keep the service (and its stores) alive
            let service = self.weak_self.clone();
            let watched_uuid = stream_uuid.clone();
            tokio::spawn(async move {
                match interrupt_rx.await {
                    Ok(exit) => {
                        error!(stream_uuid = %watched_uuid, reason = %exit.reason, "stream has been interrupted");
                        if let Some(service) = service.upgrade() {
                            service.kill_stream(&watched_uuid).await;
                        }
                    }
                    // sender dropped: worker went down through kill_stream
                    Err(_) => {}
                }
            });
        }

        info!(
            stream_uuid = %record.uuid,
            ip = %record.ip,
            port = record.port,
            mode = record.launch_mode.as_str(),
            "stream started"
        );

        Ok(build_owner_info(&record, Some(host_token)))
    }

    /// Public stream info by UUID
    pub async fn stream_info(&self, stream_uuid: &str) -> Result<StreamPublicInfo, ServiceError> {
        let record = self
            .load_stream(stream_uuid)
            .await?
            .ok_or_else(|| ServiceError::StreamNotFound(stream_uuid.to_owned()))?;

        Ok(StreamPublicInfo {
            uuid: record.uuid,
            name: record.name,
            description: record.description,
            join_policy: record.join.policy,
            started_at: record.started_at,
            finished_at: record.finished_at,
        })
    }

    /// Address of a running stream, for the service redirect
    pub async fn stream_address(&self, stream_uuid: &str) -> Result<String, ServiceError> {
        if !self.registry.contains(stream_uuid) {
            return Err(ServiceError::StreamNotFound(stream_uuid.to_owned()));
        }
        let record = self
            .load_stream(stream_uuid)
            .await?
            .ok_or_else(|| ServiceError::StreamNotFound(stream_uuid.to_owned()))?;

        Ok(format!("{}:{}", record.ip, record.port))
    }

    /// Public key of a running stream, for token verification
    pub fn stream_key(&self, stream_uuid: &str) -> Result<jsonwebtoken::DecodingKey, ServiceError> {
        let runtime = self
            .registry
            .lookup(stream_uuid)
            .ok_or_else(|| ServiceError::StreamNotFound(stream_uuid.to_owned()))?;

        Ok(runtime.keys().decoding_key().clone())
    }

    /// Finish a stream
    ///
    /// Finishing an already finished stream is a no-op; an unknown stream is
    /// an error.
    pub async fn finish_stream(&self, stream_uuid: &str) -> Result<(), ServiceError> {
        if !self.registry.contains(stream_uuid) {
            match self.load_stream(stream_uuid).await? {
                Some(record) if record.status == StreamStatus::Finished => return Ok(()),
                _ => return Err(ServiceError::StreamNotFound(stream_uuid.to_owned())),
            }
        }

        self.kill_stream(stream_uuid).await;
        Ok(())
    }

    /// Tear a stream down: close the link, stop the worker, remove the
    /// runtime, mark the row finished
    ///
    /// Idempotent; concurrent callers resolve to a single effective
    /// transition. Best-effort failures are logged and never block it.
    pub async fn kill_stream(&self, stream_uuid: &str) {
        if let Some(runtime) = self.registry.remove(stream_uuid) {
            runtime.cancel_pending();
            runtime.rpc.close().await;
            if let Err(err) = runtime.worker.lock().await.stop().await {
                error!(stream_uuid = %stream_uuid, error = %err, "could not stop stream worker");
            }
        }

        match self.load_stream(stream_uuid).await {
            Ok(Some(mut record)) => {
                if record.finish(Utc::now()) {
                    if let Err(err) = self.store_stream(&record).await {
                        error!(stream_uuid = %stream_uuid, error = %err, "could not store stream data to finish");
                    } else {
                        info!(stream_uuid = %stream_uuid, "stream finished");
                    }
                }
            }
            Ok(None) => {}
            Err(err) => {
                error!(stream_uuid = %stream_uuid, error = %err, "could not load stream data to finish");
            }
        }
    }

    /// Overlay caller-provided metadata onto a running stream
    pub async fn patch_stream(
        &self,
        stream_uuid: &str,
        cfg: PatchStreamConfig,
    ) -> Result<StreamOwnerInfo, ServiceError> {
        if !self.registry.contains(stream_uuid) {
            return Err(ServiceError::StreamNotFound(stream_uuid.to_owned()));
        }
        let mut record = self
            .load_stream(stream_uuid)
            .await?
            .ok_or_else(|| ServiceError::StreamNotFound(stream_uuid.to_owned()))?;

        if let Some(name) = cfg.name {
            record.name = name;
        }
        if let Some(description) = cfg.description {
            record.description = description;
        }
        if let Some(join) = cfg.join {
            record.join = join;
        }
        if let Some(host) = cfg.host {
            record.host.username = host.username;
            record.host.avatar_id = host.avatar_id;
        }

        self.store_stream(&record).await?;

        Ok(build_owner_info(&record, None))
    }

    /// Mint a fresh host token for a stream whose subject matches the
    /// caller's server-token subject
    pub async fn host_token(
        &self,
        stream_uuid: &str,
        subject: &str,
    ) -> Result<AuthInfo, ServiceError> {
        let runtime = self
            .registry
            .lookup(stream_uuid)
            .ok_or_else(|| ServiceError::StreamNotFound(stream_uuid.to_owned()))?;
        let record = self
            .load_stream(stream_uuid)
            .await?
            .ok_or_else(|| ServiceError::StreamNotFound(stream_uuid.to_owned()))?;

        if record.subject.is_empty() || record.subject != subject {
            return Err(ServiceError::SubjectMismatch);
        }

        let access_token =
            token::sign_stream_token(runtime.keys(), stream_uuid, &record.host.uuid, true)?;

        Ok(AuthInfo {
            access_token,
            token_type: TOKEN_TYPE_BEARER,
        })
    }

    /// Filtered, sorted, paginated stream list
    pub async fn stream_list(&self, filter: StreamFilter) -> Result<StreamList, ServiceError> {
        let mut cursor = self.stores.stream.scan(STREAM_BUCKET).await?;

        let mut streams = Vec::with_capacity(cursor.len());
        while let Some((key, value)) = cursor.next() {
            match serde_json::from_slice::<StreamRecord>(value) {
                Ok(record) => {
                    if record_fits_filter(&record, &filter) {
                        streams.push(record);
                    }
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "could not parse stream info");
                }
            }
        }

        sort_streams(&mut streams, filter.sort_by, filter.sort_order);

        let total = streams.len();
        let start = filter.page.saturating_sub(1) * filter.page_size;
        let page: Vec<StreamRecord> = streams
            .into_iter()
            .skip(start)
            .take(filter.page_size)
            .collect();

        Ok(StreamList {
            count: page.len(),
            total,
            has_next: total > filter.page * filter.page_size,
            page: filter.page,
            page_size: filter.page_size,
            streams: page,
        })
    }

    /// Reconcile stale persisted state after a restart
    ///
    /// A `running` row without a live registry entry belongs to a worker that
    /// died with the previous process; it is moved to `finished`.
    pub async fn reconcile(&self) -> Result<(), ServiceError> {
        let mut cursor = self.stores.stream.scan(STREAM_BUCKET).await?;

        let mut stale = Vec::new();
        while let Some((key, value)) = cursor.next() {
            match serde_json::from_slice::<StreamRecord>(value) {
                Ok(record) => {
                    if record.status == StreamStatus::Running
                        && !self.registry.contains(&record.uuid)
                    {
                        stale.push(record);
                    }
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "could not parse stream info");
                }
            }
        }

        for mut record in stale {
            record.finish(Utc::now());
            self.store_stream(&record).await?;
            warn!(stream_uuid = %record.uuid, "reconciled stale running stream to finished");
        }

        Ok(())
    }

    /// Kill every registered stream; used during shutdown
    pub async fn shutdown(&self) {
        for stream_uuid in self.registry.ids() {
            self.kill_stream(&stream_uuid).await;
        }
    }

    pub(crate) async fn load_stream(
        &self,
        stream_uuid: &str,
    ) -> Result<Option<StreamRecord>, ServiceError> {
        let Some(bytes) = self.stores.stream.get(STREAM_BUCKET, stream_uuid).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub(crate) async fn store_stream(&self, record: &StreamRecord) -> Result<(), ServiceError> {
        let bytes = serde_json::to_vec(record)?;
        self.stores
            .stream
            .put(STREAM_BUCKET, &record.uuid, &bytes)
            .await?;
        Ok(())
    }
}

fn build_owner_info(record: &StreamRecord, access_token: Option<String>) -> StreamOwnerInfo {
    StreamOwnerInfo {
        uuid: record.uuid.clone(),
        name: record.name.clone(),
        description: record.description.clone(),
        join_policy: record.join.policy,
        join_code: record.join.code.clone(),
        ip: record.ip.clone(),
        port: record.port,
        launch_mode: record.launch_mode,
        started_at: record.started_at,
        host: record.host.clone(),
        auth: access_token.map(|access_token| AuthInfo {
            access_token,
            token_type: TOKEN_TYPE_BEARER,
        }),
    }
}

fn record_fits_filter(record: &StreamRecord, filter: &StreamFilter) -> bool {
    if !record.name.contains(&filter.search_phrase)
        && !record.description.contains(&filter.search_phrase)
    {
        return false;
    }

    if !filter.launch_modes.is_empty() && !filter.launch_modes.contains(&record.launch_mode) {
        return false;
    }

    if !filter.statuses.is_empty() && !filter.statuses.contains(&record.status) {
        return false;
    }

    true
}

fn sort_streams(streams: &mut [StreamRecord], sort_by: SortField, sort_order: SortOrder) {
    streams.sort_by(|a, b| {
        let ordering = match sort_by {
            SortField::Uuid => a.uuid.cmp(&b.uuid),
            SortField::Name => a.name.cmp(&b.name),
            SortField::LaunchMode => a.launch_mode.as_str().cmp(b.launch_mode.as_str()),
            SortField::StartedAt => a.started_at.cmp(&b.started_at),
            SortField::Status => a.status.as_str().cmp(b.status.as_str()),
        };
        match sort_order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use codecord_core::JoinConfig;

    fn record(uuid: &str, name: &str, status: StreamStatus) -> StreamRecord {
        StreamRecord {
            uuid: uuid.into(),
            name: name.into(),
            description: String::new(),
            ip: "127.0.0.1".into(),
            port: 4000,
            launch_mode: LaunchMode::StandaloneApp,
            started_at: Utc::now(),
            finished_at: None,
            subject: String::new(),
            status,
            join: JoinConfig::default(),
            host: HostInfo::default(),
        }
    }

    #[test]
    fn test_filter_by_search_phrase() {
        let filter = StreamFilter {
            search_phrase: "demo".into(),
            ..StreamFilter::default()
        };

        assert!(record_fits_filter(
            &record("a", "demo stream", StreamStatus::Running),
            &filter
        ));
        assert!(!record_fits_filter(
            &record("a", "other", StreamStatus::Running),
            &filter
        ));
    }

    #[test]
    fn test_filter_by_status_set() {
        let filter = StreamFilter {
            statuses: vec![StreamStatus::Finished],
            ..StreamFilter::default()
        };

        assert!(!record_fits_filter(
            &record("a", "x", StreamStatus::Running),
            &filter
        ));
        assert!(record_fits_filter(
            &record("a", "x", StreamStatus::Finished),
            &filter
        ));
    }

    #[test]
    fn test_sort_streams_desc() {
        let mut streams = vec![
            record("a", "alpha", StreamStatus::Running),
            record("c", "gamma", StreamStatus::Running),
            record("b", "beta", StreamStatus::Running),
        ];
        sort_streams(&mut streams, SortField::Name, SortOrder::Desc);

        let names: Vec<&str> = streams.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["gamma", "beta", "alpha"]);
    }

    #[test]
    fn test_sort_field_parsing() {
        assert_eq!("startedAt".parse::<SortField>().unwrap(), SortField::StartedAt);
        assert!("bogus".parse::<SortField>().is_err());
        assert_eq!("desc".parse::<SortOrder>().unwrap(), SortOrder::Desc);
    }
}

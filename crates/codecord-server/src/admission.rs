//! Participant admission
//!
//! Three join policies gate admission: `auto` admits immediately, `by_code`
//! compares the supplied code byte-for-byte against the stored one, and
//! `host_resolve` parks the participant on a rendezvous until the host
//! decides. The rendezvous is a single-slot oneshot handoff whose
//! cancellation path is driven by the caller: dropping the join future
//! (client gone, request cancelled) removes the waiter through a guard, so
//! no `PendingJoin` ever outlives its join call.
//!
//! Only admitted participants are persisted; rejected and cancelled joins
//! leave no durable trace.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use codecord_core::token;
use codecord_core::{JoinPolicy, Participant, ParticipantStatus};

use crate::error::ServiceError;
use crate::lifecycle::StreamService;
use crate::registry::StreamRuntime;
use crate::rpc::WorkerParticipant;
use crate::storage::PARTICIPANT_BUCKET;

/// Join request as seen by the service layer
#[derive(Debug, Clone, Default)]
pub struct JoinRequest {
    pub name: String,
    pub avatar_id: String,
    pub ip: String,
}

/// Outcome of an admission attempt
#[derive(Debug, Clone)]
pub struct JoinDecision {
    pub allowed: bool,
    pub access_token: Option<String>,
}

/// Self-update of a participant's visible info
#[derive(Debug, Clone, Default)]
pub struct PatchParticipantConfig {
    pub name: Option<String>,
    pub avatar_id: Option<String>,
}

/// Removes the pending waiter when the join call unwinds, on every path
struct PendingGuard<'a> {
    runtime: &'a StreamRuntime,
    participant_uuid: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.runtime.remove_pending(&self.participant_uuid);
    }
}

impl StreamService {
    /// Admit a participant to a stream according to its join policy
    pub async fn join_participant(
        &self,
        stream_uuid: &str,
        join_code: &str,
        request: JoinRequest,
    ) -> Result<JoinDecision, ServiceError> {
        let runtime = self
            .registry()
            .lookup(stream_uuid)
            .ok_or_else(|| ServiceError::StreamNotFound(stream_uuid.to_owned()))?;
        let record = self
            .load_stream(stream_uuid)
            .await?
            .ok_or_else(|| ServiceError::StreamNotFound(stream_uuid.to_owned()))?;

        let mut participant = Participant {
            uuid: Uuid::new_v4().to_string(),
            name: request.name,
            avatar_id: request.avatar_id,
            ip: request.ip,
            status: ParticipantStatus::Pending,
        };

        let allowed = match record.join.policy {
            JoinPolicy::Auto => true,
            JoinPolicy::ByCode => {
                // an empty stored code admits no one
                if record.join.code.is_empty() || record.join.code != join_code {
                    return Err(ServiceError::InvalidJoinCode);
                }
                true
            }
            JoinPolicy::HostResolve => {
                let decision_rx = runtime.insert_pending(participant.clone());
                let _guard = PendingGuard {
                    runtime: &runtime,
                    participant_uuid: participant.uuid.clone(),
                };

                match decision_rx.await {
                    Ok(allowed) => allowed,
                    // the sender vanished: stream torn down mid-wait
                    Err(_) => return Err(ServiceError::JoinCancelled),
                }
            }
        };

        if !allowed {
            return Ok(JoinDecision {
                allowed: false,
                access_token: None,
            });
        }

        let access_token =
            token::sign_stream_token(runtime.keys(), stream_uuid, &participant.uuid, false)?;

        participant.status = ParticipantStatus::Active;
        self.append_participant(stream_uuid, participant.clone())
            .await?;

        let notice = worker_participant(&participant);
        let notify_runtime = Arc::clone(&runtime);
        tokio::spawn(async move {
            if let Err(err) = notify_runtime.rpc.new_participant(&notice).await {
                warn!(
                    stream_uuid = %notify_runtime.stream_uuid(),
                    participant_uuid = %notice.uuid,
                    error = %err,
                    "could not notify worker about new participant"
                );
            }
        });

        Ok(JoinDecision {
            allowed: true,
            access_token: Some(access_token),
        })
    }

    /// Resolve a pending host-resolve join
    pub fn decide_participant_join(
        &self,
        stream_uuid: &str,
        participant_uuid: &str,
        allowed: bool,
    ) -> Result<(), ServiceError> {
        let runtime = self
            .registry()
            .lookup(stream_uuid)
            .ok_or_else(|| ServiceError::StreamNotFound(stream_uuid.to_owned()))?;

        let decision_tx = runtime
            .decide_pending(participant_uuid)
            .ok_or_else(|| ServiceError::ParticipantNotFound(participant_uuid.to_owned()))?;

        // a send error means the joiner cancelled concurrently
        decision_tx
            .send(allowed)
            .map_err(|_| ServiceError::ParticipantNotFound(participant_uuid.to_owned()))
    }

    /// All participants of a running stream: parked waiters first, then the
    /// persisted admitted list
    pub async fn stream_participants(
        &self,
        stream_uuid: &str,
    ) -> Result<Vec<Participant>, ServiceError> {
        let runtime = self
            .registry()
            .lookup(stream_uuid)
            .ok_or_else(|| ServiceError::StreamNotFound(stream_uuid.to_owned()))?;

        let mut participants = runtime.pending_participants();
        participants.extend(self.load_participants(stream_uuid).await?);

        Ok(participants)
    }

    /// Update a participant's own name or avatar
    pub async fn patch_participant(
        &self,
        stream_uuid: &str,
        participant_uuid: &str,
        cfg: PatchParticipantConfig,
    ) -> Result<Participant, ServiceError> {
        let runtime = self
            .registry()
            .lookup(stream_uuid)
            .ok_or_else(|| ServiceError::StreamNotFound(stream_uuid.to_owned()))?;

        let mut participants = self.load_participants(stream_uuid).await?;
        let participant = participants
            .iter_mut()
            .find(|p| p.uuid == participant_uuid)
            .ok_or_else(|| ServiceError::ParticipantNotFound(participant_uuid.to_owned()))?;

        if let Some(name) = cfg.name {
            participant.name = name;
        }
        if let Some(avatar_id) = cfg.avatar_id {
            participant.avatar_id = avatar_id;
        }
        let updated = participant.clone();

        self.store_participants(stream_uuid, &participants).await?;

        let notice = worker_participant(&updated);
        tokio::spawn(async move {
            if let Err(err) = runtime.rpc.change_participant_info(&notice).await {
                warn!(
                    stream_uuid = %runtime.stream_uuid(),
                    participant_uuid = %notice.uuid,
                    error = %err,
                    "could not notify worker about participant change"
                );
            }
        });

        Ok(updated)
    }

    async fn append_participant(
        &self,
        stream_uuid: &str,
        participant: Participant,
    ) -> Result<(), ServiceError> {
        let mut participants = self.load_participants(stream_uuid).await?;
        participants.push(participant);
        self.store_participants(stream_uuid, &participants).await
    }

    async fn load_participants(
        &self,
        stream_uuid: &str,
    ) -> Result<Vec<Participant>, ServiceError> {
        let Some(bytes) = self
            .stores()
            .participant
            .get(PARTICIPANT_BUCKET, stream_uuid)
            .await?
        else {
            return Ok(Vec::new());
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn store_participants(
        &self,
        stream_uuid: &str,
        participants: &[Participant],
    ) -> Result<(), ServiceError> {
        let bytes = serde_json::to_vec(participants)?;
        self.stores()
            .participant
            .put(PARTICIPANT_BUCKET, stream_uuid, &bytes)
            .await?;
        Ok(())
    }
}

fn worker_participant(participant: &Participant) -> WorkerParticipant {
    WorkerParticipant {
        uuid: participant.uuid.clone(),
        name: participant.name.clone(),
        avatar_id: participant.avatar_id.clone(),
        status: participant.status,
        is_host: false,
    }
}

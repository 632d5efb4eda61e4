//! Admission integration tests
//!
//! Cover the three join policies, the host-resolve rendezvous with its
//! cancellation paths, and participant persistence.

mod common;

use codecord_core::token::verify_stream_token;
use codecord_core::ParticipantStatus;
use codecord_server::admission::{JoinRequest, PatchParticipantConfig};
use codecord_server::error::ServiceError;

use common::{auto_join, by_code_join, host_resolve_join, stream_config, wait_until, Harness};

fn join_request(name: &str) -> JoinRequest {
    JoinRequest {
        name: name.to_owned(),
        avatar_id: String::new(),
        ip: "192.0.2.10".into(),
    }
}

#[tokio::test]
async fn test_auto_policy_admits_immediately() {
    let harness = Harness::new();
    harness.queue_worker().await;

    let info = harness
        .service
        .new_stream(stream_config("demo", auto_join()))
        .await
        .unwrap();

    let decision = harness
        .service
        .join_participant(&info.uuid, "", join_request("bob"))
        .await
        .unwrap();
    assert!(decision.allowed);

    // the participant token binds the participant, not the host
    let key = harness.service.stream_key(&info.uuid).unwrap();
    let claims = verify_stream_token(&key, &decision.access_token.unwrap()).unwrap();
    assert!(!claims.host);
    assert_eq!(claims.stream_uuid, info.uuid);

    let participants = harness
        .service
        .stream_participants(&info.uuid)
        .await
        .unwrap();
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].name, "bob");
    assert_eq!(participants[0].status, ParticipantStatus::Active);
}

#[tokio::test]
async fn test_by_code_policy_is_byte_exact() {
    let harness = Harness::new();
    harness.queue_worker().await;

    let info = harness
        .service
        .new_stream(stream_config("demo", by_code_join("123456")))
        .await
        .unwrap();

    let err = harness
        .service
        .join_participant(&info.uuid, "999999", join_request("bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidJoinCode));

    // case differences are mismatches too
    let err = harness
        .service
        .join_participant(&info.uuid, "123456 ", join_request("bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidJoinCode));

    let decision = harness
        .service
        .join_participant(&info.uuid, "123456", join_request("bob"))
        .await
        .unwrap();
    assert!(decision.allowed);
    assert!(decision.access_token.is_some());

    // a rejected attempt left no durable trace
    let participants = harness
        .service
        .stream_participants(&info.uuid)
        .await
        .unwrap();
    assert_eq!(participants.len(), 1);
}

#[tokio::test]
async fn test_empty_stored_code_admits_no_one() {
    let harness = Harness::new();
    harness.queue_worker().await;

    let info = harness
        .service
        .new_stream(stream_config("demo", by_code_join("")))
        .await
        .unwrap();

    // even a matching empty code is rejected
    let err = harness
        .service
        .join_participant(&info.uuid, "", join_request("bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidJoinCode));
}

#[tokio::test]
async fn test_host_resolve_rendezvous_allows() {
    let harness = Harness::new();
    harness.queue_worker().await;

    let info = harness
        .service
        .new_stream(stream_config("demo", host_resolve_join()))
        .await
        .unwrap();

    let service = harness.service.clone();
    let stream_uuid = info.uuid.clone();
    let joiner = tokio::spawn(async move {
        service
            .join_participant(&stream_uuid, "", join_request("bob"))
            .await
    });

    // the parked participant becomes visible to the host
    let service = harness.service.clone();
    let stream_uuid = info.uuid.clone();
    assert!(
        wait_until(move || {
            service
                .registry()
                .lookup(&stream_uuid)
                .map(|runtime| !runtime.pending_participants().is_empty())
                .unwrap_or(false)
        })
        .await
    );
    let pending = harness
        .service
        .stream_participants(&info.uuid)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, ParticipantStatus::Pending);
    let participant_uuid = pending[0].uuid.clone();

    harness
        .service
        .decide_participant_join(&info.uuid, &participant_uuid, true)
        .unwrap();

    let decision = joiner.await.unwrap().unwrap();
    assert!(decision.allowed);
    assert!(decision.access_token.is_some());

    // the waiter is gone and the participant is persisted as active
    let runtime = harness.service.registry().lookup(&info.uuid).unwrap();
    assert!(runtime.pending_participants().is_empty());

    let participants = harness
        .service
        .stream_participants(&info.uuid)
        .await
        .unwrap();
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].uuid, participant_uuid);
    assert_eq!(participants[0].status, ParticipantStatus::Active);
}

#[tokio::test]
async fn test_host_resolve_rendezvous_denies() {
    let harness = Harness::new();
    harness.queue_worker().await;

    let info = harness
        .service
        .new_stream(stream_config("demo", host_resolve_join()))
        .await
        .unwrap();

    let service = harness.service.clone();
    let stream_uuid = info.uuid.clone();
    let joiner = tokio::spawn(async move {
        service
            .join_participant(&stream_uuid, "", join_request("mallory"))
            .await
    });

    let service = harness.service.clone();
    let stream_uuid = info.uuid.clone();
    assert!(
        wait_until(move || {
            service
                .registry()
                .lookup(&stream_uuid)
                .map(|runtime| !runtime.pending_participants().is_empty())
                .unwrap_or(false)
        })
        .await
    );
    let pending = harness
        .service
        .stream_participants(&info.uuid)
        .await
        .unwrap();
    let participant_uuid = pending[0].uuid.clone();

    harness
        .service
        .decide_participant_join(&info.uuid, &participant_uuid, false)
        .unwrap();

    let decision = joiner.await.unwrap().unwrap();
    assert!(!decision.allowed);
    assert!(decision.access_token.is_none());

    // a denied participant leaves no durable trace
    let participants = harness
        .service
        .stream_participants(&info.uuid)
        .await
        .unwrap();
    assert!(participants.is_empty());
}

#[tokio::test]
async fn test_cancelled_joiner_removes_its_waiter() {
    let harness = Harness::new();
    harness.queue_worker().await;

    let info = harness
        .service
        .new_stream(stream_config("demo", host_resolve_join()))
        .await
        .unwrap();

    let service = harness.service.clone();
    let stream_uuid = info.uuid.clone();
    let joiner = tokio::spawn(async move {
        service
            .join_participant(&stream_uuid, "", join_request("bob"))
            .await
    });

    let runtime = harness.service.registry().lookup(&info.uuid).unwrap();
    {
        let runtime = runtime.clone();
        assert!(wait_until(move || !runtime.pending_participants().is_empty()).await);
    }

    // the client goes away mid-wait
    joiner.abort();

    {
        let runtime = runtime.clone();
        assert!(wait_until(move || runtime.pending_participants().is_empty()).await);
    }

    // deciding for the vanished participant is now an error
    let pending_uuid = "already-gone";
    assert!(matches!(
        harness
            .service
            .decide_participant_join(&info.uuid, pending_uuid, true),
        Err(ServiceError::ParticipantNotFound(_))
    ));
}

#[tokio::test]
async fn test_decide_requires_running_stream_and_known_participant() {
    let harness = Harness::new();
    harness.queue_worker().await;

    let info = harness
        .service
        .new_stream(stream_config("demo", host_resolve_join()))
        .await
        .unwrap();

    assert!(matches!(
        harness
            .service
            .decide_participant_join("no-such-stream", "p-1", true),
        Err(ServiceError::StreamNotFound(_))
    ));
    assert!(matches!(
        harness
            .service
            .decide_participant_join(&info.uuid, "p-1", true),
        Err(ServiceError::ParticipantNotFound(_))
    ));
}

#[tokio::test]
async fn test_patch_participant_updates_persisted_info() {
    let harness = Harness::new();
    harness.queue_worker().await;

    let info = harness
        .service
        .new_stream(stream_config("demo", auto_join()))
        .await
        .unwrap();

    harness
        .service
        .join_participant(&info.uuid, "", join_request("bob"))
        .await
        .unwrap();

    let participants = harness
        .service
        .stream_participants(&info.uuid)
        .await
        .unwrap();
    let participant_uuid = participants[0].uuid.clone();

    let updated = harness
        .service
        .patch_participant(
            &info.uuid,
            &participant_uuid,
            PatchParticipantConfig {
                name: Some("robert".into()),
                avatar_id: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "robert");

    let participants = harness
        .service
        .stream_participants(&info.uuid)
        .await
        .unwrap();
    assert_eq!(participants[0].name, "robert");

    assert!(matches!(
        harness
            .service
            .patch_participant(&info.uuid, "unknown", PatchParticipantConfig::default())
            .await,
        Err(ServiceError::ParticipantNotFound(_))
    ));
}

#[tokio::test]
async fn test_join_unknown_stream() {
    let harness = Harness::new();

    let err = harness
        .service
        .join_participant("no-such-stream", "", join_request("bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::StreamNotFound(_)));
}

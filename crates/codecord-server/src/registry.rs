//! Live stream registry
//!
//! Thread-safe mapping from stream UUID to its runtime handle. A runtime
//! exists exactly while the worker is up and connected; the persisted row
//! and the registry entry move together (a `running` row always has a
//! runtime, a `finished` row never does).

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use tokio::sync::{oneshot, Mutex};

use codecord_core::{Participant, RsaKeyPair};

use crate::launcher::Worker;
use crate::rpc::RpcLink;

/// A participant parked on the host-resolve rendezvous
pub struct PendingJoin {
    participant: Participant,
    decision: Option<oneshot::Sender<bool>>,
}

/// Live state of one running stream
///
/// Reference-immutable after insertion; the mutable sub-state (worker,
/// pending joins) carries its own synchronization. Dropping the runtime
/// drops the keypair, which invalidates every outstanding stream token, and
/// drops the pending decision senders, which cancels parked joiners.
pub struct StreamRuntime {
    stream_uuid: String,
    pub worker: Mutex<Box<dyn Worker>>,
    pub rpc: RpcLink,
    keys: RsaKeyPair,
    pending: StdMutex<HashMap<String, PendingJoin>>,
}

impl StreamRuntime {
    pub fn new(stream_uuid: String, worker: Box<dyn Worker>, rpc: RpcLink, keys: RsaKeyPair) -> Self {
        Self {
            stream_uuid,
            worker: Mutex::new(worker),
            rpc,
            keys,
            pending: StdMutex::new(HashMap::new()),
        }
    }

    pub fn stream_uuid(&self) -> &str {
        &self.stream_uuid
    }

    pub fn keys(&self) -> &RsaKeyPair {
        &self.keys
    }

    /// Park a participant awaiting the host's decision
    pub fn insert_pending(&self, participant: Participant) -> oneshot::Receiver<bool> {
        let (decision_tx, decision_rx) = oneshot::channel();
        let mut pending = self.pending.lock().unwrap();
        pending.insert(
            participant.uuid.clone(),
            PendingJoin {
                participant,
                decision: Some(decision_tx),
            },
        );
        decision_rx
    }

    /// Remove a waiter; removing an absent waiter is a no-op
    pub fn remove_pending(&self, participant_uuid: &str) {
        self.pending.lock().unwrap().remove(participant_uuid);
    }

    /// Take the decision sender for a parked participant
    ///
    /// Yields `None` when the participant is unknown or already decided.
    pub fn decide_pending(&self, participant_uuid: &str) -> Option<oneshot::Sender<bool>> {
        self.pending
            .lock()
            .unwrap()
            .get_mut(participant_uuid)
            .and_then(|join| join.decision.take())
    }

    /// Drop every pending decision sender, waking parked joiners with a
    /// cancellation
    pub fn cancel_pending(&self) {
        self.pending.lock().unwrap().clear();
    }

    /// Snapshot of all parked participants
    pub fn pending_participants(&self) -> Vec<Participant> {
        self.pending
            .lock()
            .unwrap()
            .values()
            .map(|join| join.participant.clone())
            .collect()
    }
}

/// Thread-safe mapping stream UUID → live runtime
pub struct StreamRegistry {
    streams: RwLock<HashMap<String, Arc<StreamRuntime>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, runtime: Arc<StreamRuntime>) {
        let mut streams = self.streams.write().unwrap();
        streams.insert(runtime.stream_uuid().to_owned(), runtime);
    }

    pub fn lookup(&self, stream_uuid: &str) -> Option<Arc<StreamRuntime>> {
        let streams = self.streams.read().unwrap();
        streams.get(stream_uuid).cloned()
    }

    pub fn contains(&self, stream_uuid: &str) -> bool {
        let streams = self.streams.read().unwrap();
        streams.contains_key(stream_uuid)
    }

    /// Remove and return the runtime
    ///
    /// Load-and-remove is atomic, which serializes teardown: of two
    /// concurrent `kill` callers only one receives the runtime, the other
    /// becomes a no-op.
    pub fn remove(&self, stream_uuid: &str) -> Option<Arc<StreamRuntime>> {
        let mut streams = self.streams.write().unwrap();
        streams.remove(stream_uuid)
    }

    /// Best-effort snapshot of all registered stream UUIDs
    pub fn ids(&self) -> Vec<String> {
        let streams = self.streams.read().unwrap();
        streams.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let streams = self.streams.read().unwrap();
        streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use codecord_core::ParticipantStatus;

    use crate::launcher::{LaunchError, WorkerAddress, WorkerExit};

    struct NoopWorker;

    #[async_trait]
    impl Worker for NoopWorker {
        async fn start(&mut self) -> Result<WorkerAddress, LaunchError> {
            Ok(WorkerAddress {
                ip: "127.0.0.1".into(),
                port: 0,
            })
        }

        async fn stop(&mut self) -> Result<(), LaunchError> {
            Ok(())
        }

        fn take_interrupts(&mut self) -> Option<oneshot::Receiver<WorkerExit>> {
            None
        }
    }

    fn test_runtime(stream_uuid: &str) -> Arc<StreamRuntime> {
        Arc::new(StreamRuntime::new(
            stream_uuid.to_owned(),
            Box::new(NoopWorker),
            RpcLink::closed_for_tests(),
            RsaKeyPair::generate().unwrap(),
        ))
    }

    fn test_participant(uuid: &str) -> Participant {
        Participant {
            uuid: uuid.to_owned(),
            name: "bob".into(),
            avatar_id: String::new(),
            ip: "127.0.0.1".into(),
            status: ParticipantStatus::Pending,
        }
    }

    #[tokio::test]
    async fn test_insert_lookup_remove() {
        let registry = StreamRegistry::new();
        assert!(registry.is_empty());

        registry.insert(test_runtime("s-1"));
        assert!(registry.contains("s-1"));
        assert!(registry.lookup("s-1").is_some());

        assert!(registry.remove("s-1").is_some());
        // removal is idempotent: the second caller gets nothing
        assert!(registry.remove("s-1").is_none());
        assert!(!registry.contains("s-1"));
    }

    #[tokio::test]
    async fn test_pending_join_lifecycle() {
        let runtime = test_runtime("s-1");

        let mut decision_rx = runtime.insert_pending(test_participant("p-1"));
        assert_eq!(runtime.pending_participants().len(), 1);

        let decision_tx = runtime.decide_pending("p-1").unwrap();
        // a second decision for the same waiter is impossible
        assert!(runtime.decide_pending("p-1").is_none());

        decision_tx.send(true).unwrap();
        assert!(decision_rx.try_recv().unwrap());

        runtime.remove_pending("p-1");
        assert!(runtime.pending_participants().is_empty());
        // removing again is a no-op
        runtime.remove_pending("p-1");
    }

    #[tokio::test]
    async fn test_dropping_runtime_cancels_waiters() {
        let runtime = test_runtime("s-1");
        let decision_rx = runtime.insert_pending(test_participant("p-1"));

        drop(runtime);
        assert!(decision_rx.await.is_err());
    }
}

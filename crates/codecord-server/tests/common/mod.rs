#![allow(dead_code)]

//! Shared harness for the integration tests
//!
//! Streams are backed by stub workers whose "business logic" is a tiny
//! in-process JSON-RPC endpoint, so the full lifecycle runs without any
//! external binaries or containers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;

use codecord_core::{JoinConfig, JoinPolicy};
use codecord_server::launcher::{
    LaunchError, LaunchSpec, Worker, WorkerAddress, WorkerExit, WorkerFactory,
};
use codecord_server::lifecycle::{HostConfig, StreamConfig, StreamService};
use codecord_server::registry::StreamRegistry;
use codecord_server::storage::Stores;

/// Control handle over one stub worker, kept by the test
pub struct StubHandle {
    pub interrupt_tx: oneshot::Sender<WorkerExit>,
    pub stopped: Arc<AtomicBool>,
}

/// Worker whose address points at an in-process fake RPC endpoint
pub struct StubWorker {
    address: WorkerAddress,
    interrupts: Option<oneshot::Receiver<WorkerExit>>,
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl Worker for StubWorker {
    async fn start(&mut self) -> Result<WorkerAddress, LaunchError> {
        Ok(self.address.clone())
    }

    async fn stop(&mut self) -> Result<(), LaunchError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn take_interrupts(&mut self) -> Option<oneshot::Receiver<WorkerExit>> {
        self.interrupts.take()
    }
}

pub fn make_stub(address: WorkerAddress) -> (StubWorker, StubHandle) {
    let (interrupt_tx, interrupt_rx) = oneshot::channel();
    let stopped = Arc::new(AtomicBool::new(false));

    (
        StubWorker {
            address,
            interrupts: Some(interrupt_rx),
            stopped: Arc::clone(&stopped),
        },
        StubHandle {
            interrupt_tx,
            stopped,
        },
    )
}

/// Factory handing out pre-queued stub workers
#[derive(Default)]
pub struct StubFactory {
    workers: Mutex<VecDeque<StubWorker>>,
}

impl StubFactory {
    pub fn queue(&self, worker: StubWorker) {
        self.workers.lock().unwrap().push_back(worker);
    }
}

impl WorkerFactory for StubFactory {
    fn build(
        &self,
        _stream_uuid: &str,
        _launch: &LaunchSpec,
    ) -> Result<Box<dyn Worker>, LaunchError> {
        self.workers
            .lock()
            .unwrap()
            .pop_front()
            .map(|worker| Box::new(worker) as Box<dyn Worker>)
            .ok_or_else(|| LaunchError::InvalidConfig("no stub worker queued".into()))
    }
}

/// Spawn a fake stream worker endpoint answering every JSON-RPC call
pub async fn spawn_fake_worker_endpoint() -> WorkerAddress {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);
                let mut line = String::new();
                while matches!(reader.read_line(&mut line).await, Ok(n) if n > 0) {
                    let request: serde_json::Value = serde_json::from_str(&line).unwrap();
                    let response = serde_json::json!({
                        "id": request["id"],
                        "result": null,
                        "error": null,
                    });
                    let mut payload = serde_json::to_vec(&response).unwrap();
                    payload.push(b'\n');
                    if write_half.write_all(&payload).await.is_err() {
                        break;
                    }
                    line.clear();
                }
            });
        }
    });

    WorkerAddress {
        ip: "127.0.0.1".into(),
        port,
    }
}

/// Service plus the hooks the tests assert against
pub struct Harness {
    pub service: Arc<StreamService>,
    pub stores: Arc<Stores>,
    pub factory: Arc<StubFactory>,
    _dir: Option<tempfile::TempDir>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::TempDir::new().unwrap();
        let mut harness = Self::new_at(dir.path());
        harness._dir = Some(dir);
        harness
    }

    /// Build a harness over an existing data folder; used to simulate a
    /// process restart against the same stores
    pub fn new_at(data_folder: &std::path::Path) -> Self {
        let stores = Arc::new(Stores::open(data_folder).unwrap());
        let registry = Arc::new(StreamRegistry::new());
        let factory = Arc::new(StubFactory::default());

        let service = StreamService::with_dial_attempts(
            registry,
            Arc::clone(&stores),
            Arc::clone(&factory) as Arc<dyn WorkerFactory>,
            1,
        );

        Self {
            service,
            stores,
            factory,
            _dir: None,
        }
    }

    /// Queue a stub worker backed by a live fake endpoint
    pub async fn queue_worker(&self) -> StubHandle {
        let address = spawn_fake_worker_endpoint().await;
        let (worker, handle) = make_stub(address);
        self.factory.queue(worker);
        handle
    }

    /// Queue a stub worker whose address nothing listens on
    pub fn queue_unreachable_worker(&self) -> StubHandle {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (worker, handle) = make_stub(WorkerAddress {
            ip: "127.0.0.1".into(),
            port,
        });
        self.factory.queue(worker);
        handle
    }
}

pub fn stream_config(name: &str, join: JoinConfig) -> StreamConfig {
    StreamConfig {
        name: name.to_owned(),
        description: String::new(),
        subject: String::new(),
        join,
        launch: LaunchSpec::default(),
        host: HostConfig {
            username: "alice".into(),
            avatar_id: String::new(),
            ip: "127.0.0.1".into(),
        },
    }
}

pub fn auto_join() -> JoinConfig {
    JoinConfig {
        policy: JoinPolicy::Auto,
        code: String::new(),
    }
}

pub fn by_code_join(code: &str) -> JoinConfig {
    JoinConfig {
        policy: JoinPolicy::ByCode,
        code: code.to_owned(),
    }
}

pub fn host_resolve_join() -> JoinConfig {
    JoinConfig {
        policy: JoinPolicy::HostResolve,
        code: String::new(),
    }
}

/// Poll `condition` until it holds or a second passes
pub async fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
